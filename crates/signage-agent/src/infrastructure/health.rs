//! Health sampling through `sysinfo`.
//!
//! - CPU: global usage since the previous refresh.  The sampler refreshes
//!   once on construction so the first report already measures a delta.
//! - Memory: `1 - available / total`.
//! - Disk: used share of the filesystem holding the watched path (`/` by
//!   default), matched by longest mount-point prefix.
//! - Uptime: seconds since boot.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sysinfo::{Disks, System};
use tracing::debug;

use crate::application::health::{HealthError, HealthSample, HealthSampler};

pub struct SysinfoHealthSampler {
    system: Mutex<System>,
    disks: Mutex<Disks>,
    watched: PathBuf,
}

impl Default for SysinfoHealthSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoHealthSampler {
    /// Watches the root filesystem.
    pub fn new() -> Self {
        Self::watching("/")
    }

    /// Reports disk usage for the filesystem that holds `path`.
    pub fn watching(path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            watched: path.into(),
        }
    }
}

impl HealthSampler for SysinfoHealthSampler {
    fn sample(&self) -> Result<HealthSample, HealthError> {
        let (cpu_usage, memory_usage) = {
            let mut system = self.system.lock().map_err(|_| HealthError::Unavailable {
                what: "system",
                reason: "sampler lock poisoned".into(),
            })?;
            system.refresh_cpu();
            system.refresh_memory();
            let memory = memory_percent(system.total_memory(), system.available_memory())
                .ok_or(HealthError::Unavailable {
                    what: "memory",
                    reason: "total memory reported as zero".into(),
                })?;
            (round1(f64::from(system.global_cpu_info().cpu_usage())), memory)
        };

        let disk_usage = match self.disks.lock() {
            Ok(mut disks) => {
                disks.refresh_list();
                disk_percent(
                    disks
                        .list()
                        .iter()
                        .map(|d| (d.mount_point(), d.total_space(), d.available_space())),
                    &self.watched,
                )
            }
            Err(_) => None,
        };
        if disk_usage.is_none() {
            debug!("no disk usage for {}", self.watched.display());
        }

        Ok(HealthSample {
            cpu_usage: cpu_usage.clamp(0.0, 100.0),
            memory_usage,
            disk_usage,
            uptime: System::uptime(),
        })
    }
}

pub fn memory_percent(total: u64, available: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(round1(
        total.saturating_sub(available) as f64 * 100.0 / total as f64,
    ))
}

/// Used share of the mount that best matches `path`.
///
/// `mounts` yields `(mount point, total bytes, available bytes)`.  The
/// longest mount point that is a prefix of `path` wins; zero-sized mounts
/// are skipped.
pub fn disk_percent<'a>(
    mounts: impl IntoIterator<Item = (&'a Path, u64, u64)>,
    path: &Path,
) -> Option<f64> {
    let (_, total, available) = mounts
        .into_iter()
        .filter(|(mount, total, _)| *total > 0 && path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())?;
    Some(round1(
        total.saturating_sub(available) as f64 * 100.0 / total as f64,
    ))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
