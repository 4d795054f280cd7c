//! HealthMonitor: periodic `health-report` and `device-status` heartbeats.

use std::sync::Arc;
use std::time::Duration;

use signage_core::protocol::messages::{DeviceStatus, DeviceStatusKind, HealthReport, OutboundEvent};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::screenshots::FrameCapturer;
use crate::application::telemetry::Telemetry;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("cannot read {what}: {reason}")]
    Unavailable { what: &'static str, reason: String },
}

/// One reading of the host's vital signs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSample {
    /// Percent, 0–100.
    pub cpu_usage: f64,
    /// Percent, 0–100.
    pub memory_usage: f64,
    /// Percent, 0–100, when known.
    pub disk_usage: Option<f64>,
    /// Seconds since boot.
    pub uptime: u64,
}

/// Reads host metrics.
pub trait HealthSampler: Send + Sync {
    /// # Errors
    ///
    /// Returns [`HealthError`] if the platform does not expose the metrics.
    fn sample(&self) -> Result<HealthSample, HealthError>;
}

/// Emits one health report and one `online` status, in that order.
pub fn report_once(sampler: &dyn HealthSampler, telemetry: &dyn Telemetry, current_url: Option<String>) {
    match sampler.sample() {
        Ok(sample) => telemetry.emit(OutboundEvent::HealthReport(HealthReport {
            cpu_usage: sample.cpu_usage,
            memory_usage: sample.memory_usage,
            disk_usage: sample.disk_usage,
            uptime: sample.uptime,
            current_url,
        })),
        Err(e) => warn!("health sample failed: {e}"),
    }
    telemetry.emit(OutboundEvent::DeviceStatus(DeviceStatus {
        status: DeviceStatusKind::Online,
        message: None,
    }));
}

/// Spawns the health loop.  The interval is re-read whenever `interval`
/// changes, so a `config-update` takes effect without a restart.
pub fn spawn_health_loop(
    sampler: Arc<dyn HealthSampler>,
    telemetry: Arc<dyn Telemetry>,
    pages: Arc<dyn FrameCapturer>,
    mut interval: watch::Receiver<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let every = *interval.borrow_and_update();
            tokio::select! {
                _ = tokio::time::sleep(every) => {
                    debug!("health tick");
                    report_once(sampler.as_ref(), telemetry.as_ref(), pages.current_url());
                }
                changed = interval.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{FixedCapturer, RecordingTelemetry};

    struct FixedSampler;

    impl HealthSampler for FixedSampler {
        fn sample(&self) -> Result<HealthSample, HealthError> {
            Ok(HealthSample {
                cpu_usage: 12.5,
                memory_usage: 40.0,
                disk_usage: None,
                uptime: 3600,
            })
        }
    }

    struct BrokenSampler;

    impl HealthSampler for BrokenSampler {
        fn sample(&self) -> Result<HealthSample, HealthError> {
            Err(HealthError::Unavailable {
                what: "/proc/meminfo",
                reason: "not found".into(),
            })
        }
    }

    #[test]
    fn test_report_once_emits_report_then_online_status() {
        let telemetry = RecordingTelemetry::default();

        report_once(&FixedSampler, &telemetry, Some("https://example.com/".into()));

        let names: Vec<&str> = telemetry.events().iter().map(OutboundEvent::event_name).collect();
        assert_eq!(names, ["health-report", "device-status"]);
    }

    #[test]
    fn test_failed_sample_still_reports_online() {
        let telemetry = RecordingTelemetry::default();

        report_once(&BrokenSampler, &telemetry, None);

        let names: Vec<&str> = telemetry.events().iter().map(OutboundEvent::event_name).collect();
        assert_eq!(names, ["device-status"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_follows_interval_changes() {
        // Arrange
        let telemetry = Arc::new(RecordingTelemetry::default());
        let (tx, rx) = watch::channel(Duration::from_secs(60));
        let _task = spawn_health_loop(
            Arc::new(FixedSampler),
            telemetry.clone(),
            Arc::new(FixedCapturer::new("", "https://example.com/")),
            rx,
        );

        // Act
        tokio::time::sleep(Duration::from_secs(61)).await;
        tx.send_replace(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(25)).await;

        // Assert: one report at 60 s, then two at the faster rate.
        assert_eq!(telemetry.health_reports().len(), 3);
    }
}
