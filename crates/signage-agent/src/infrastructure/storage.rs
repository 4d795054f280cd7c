//! TOML persistence for [`RuntimeOverrides`].
//!
//! The overrides file lives in the platform configuration directory:
//! - Linux:    `$XDG_CONFIG_HOME/signage-agent/overrides.toml`
//!             (or `~/.config/signage-agent/overrides.toml`)
//! - macOS:    `~/Library/Application Support/SignageAgent/overrides.toml`
//! - Windows:  `%APPDATA%\SignageAgent\overrides.toml`
//!
//! A missing file means "no overrides".  A file that cannot be parsed is an
//! error; the binary logs it and starts with the flag/environment values.

use std::path::{Path, PathBuf};

use crate::application::settings::{OverrideStore, StorageError};
use crate::domain::config::RuntimeOverrides;

const OVERRIDES_FILE: &str = "overrides.toml";

/// Reads and writes one overrides file.
pub struct TomlOverrideStore {
    path: PathBuf,
}

impl TomlOverrideStore {
    /// A store at the platform default location.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoPlatformConfigDir`] when the base directory
    /// cannot be determined from the environment.
    pub fn at_default_location() -> Result<Self, StorageError> {
        let dir = platform_config_dir().ok_or(StorageError::NoPlatformConfigDir)?;
        Ok(Self::at(dir.join(OVERRIDES_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverrideStore for TomlOverrideStore {
    fn load(&self) -> Result<RuntimeOverrides, StorageError> {
        load_overrides_at(&self.path)
    }

    fn save(&self, overrides: &RuntimeOverrides) -> Result<(), StorageError> {
        save_overrides_at(&self.path, overrides)
    }
}

/// Loads overrides from `path`, or the empty set if the file does not exist.
///
/// # Errors
///
/// Returns [`StorageError::Io`] for file-system errors other than "not found"
/// and [`StorageError::Parse`] for malformed TOML.
pub fn load_overrides_at(path: &Path) -> Result<RuntimeOverrides, StorageError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|source| StorageError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RuntimeOverrides::default()),
        Err(source) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `overrides` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`StorageError::Io`] for file-system failures or
/// [`StorageError::Serialize`] if serialization fails.
pub fn save_overrides_at(path: &Path, overrides: &RuntimeOverrides) -> Result<(), StorageError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(overrides)?;
    std::fs::write(path, content).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory for the agent.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SignageAgent"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("signage-agent"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("SignageAgent")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("signage-agent-test-{}", Uuid::new_v4()))
            .join(OVERRIDES_FILE)
    }

    #[test]
    fn test_missing_file_loads_empty_overrides() {
        let path = scratch_path();

        let loaded = load_overrides_at(&path).unwrap();

        assert_eq!(loaded, RuntimeOverrides::default());
    }

    #[test]
    fn test_save_creates_directory_and_round_trips() {
        // Arrange
        let store = TomlOverrideStore::at(scratch_path());
        let overrides = RuntimeOverrides {
            screenshot_interval_ms: Some(60_000),
            log_level: Some("debug".into()),
            ..RuntimeOverrides::default()
        };

        // Act
        store.save(&overrides).unwrap();
        let loaded = store.load().unwrap();

        // Assert
        assert_eq!(loaded, overrides);
        if let Some(dir) = store.path().parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let path = scratch_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "screenshot_interval_ms = \"soon\"").unwrap();

        let err = load_overrides_at(&path).unwrap_err();

        assert!(matches!(err, StorageError::Parse { .. }));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
