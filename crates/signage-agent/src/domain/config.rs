//! Agent configuration types.
//!
//! [`AgentConfig`] is the single source of truth for startup settings.  It is
//! produced once by [`RawConfig::validate`] from the environment-style values
//! the binary parses, and then shared read-only.
//!
//! Settings the server may change while the agent runs (screenshot and
//! health intervals, display size, log level) are tracked separately in
//! [`RuntimeOverrides`], which is persisted across restarts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use signage_core::protocol::messages::{ConfigUpdate, DisplaySize};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Lowest screenshot interval the agent accepts.
pub const MIN_SCREENSHOT_INTERVAL: Duration = Duration::from_millis(30_000);

pub const DEFAULT_DISPLAY_WIDTH: u32 = 1920;
pub const DEFAULT_DISPLAY_HEIGHT: u32 = 1080;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_SCREENSHOT_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Startup validation failures.  Every variant is fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("SERVER_URL is required")]
    MissingServerUrl,

    #[error("DEVICE_TOKEN is required")]
    MissingDeviceToken,

    #[error("SERVER_URL '{url}' is not a valid URL: {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("SERVER_URL must use http or https, got '{0}'")]
    UnsupportedScheme(String),

    #[error("display size must be non-zero, got {width}x{height}")]
    InvalidDisplaySize { width: u32, height: u32 },

    #[error("HEALTH_CHECK_INTERVAL must be greater than zero")]
    ZeroHealthInterval,
}

/// Unvalidated settings as read from flags and environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConfig {
    pub server_url: Option<String>,
    pub device_token: Option<String>,
    pub display_width: u32,
    pub display_height: u32,
    pub kiosk_mode: bool,
    pub health_check_interval_ms: u64,
    pub screenshot_interval_ms: u64,
    pub log_level: String,
    pub browser_path: PathBuf,
    pub browser_user_data_dir: Option<PathBuf>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            device_token: None,
            display_width: DEFAULT_DISPLAY_WIDTH,
            display_height: DEFAULT_DISPLAY_HEIGHT,
            kiosk_mode: true,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            screenshot_interval_ms: DEFAULT_SCREENSHOT_INTERVAL_MS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            browser_path: PathBuf::from("chromium"),
            browser_user_data_dir: None,
        }
    }
}

/// Validated startup configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Server origin; relative content URLs resolve against it.
    pub server_url: Url,
    /// Opaque credential sent in `device-register`.
    pub device_token: String,
    pub display: DisplaySize,
    pub kiosk_mode: bool,
    pub health_check_interval: Duration,
    pub screenshot_interval: Duration,
    pub log_level: String,
    pub browser_path: PathBuf,
    pub browser_user_data_dir: Option<PathBuf>,
}

impl RawConfig {
    /// Checks required fields and normalises values.
    ///
    /// The screenshot interval is clamped up to [`MIN_SCREENSHOT_INTERVAL`]
    /// with a warning rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing origin or token, an unparsable
    /// or non-http(s) origin, a zero display size, or a zero health interval.
    pub fn validate(self) -> Result<AgentConfig, ConfigError> {
        let raw_url = self
            .server_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingServerUrl)?;
        let server_url = Url::parse(raw_url).map_err(|e| ConfigError::InvalidServerUrl {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(server_url.scheme().to_string()));
        }

        let device_token = self
            .device_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingDeviceToken)?;

        if self.display_width == 0 || self.display_height == 0 {
            return Err(ConfigError::InvalidDisplaySize {
                width: self.display_width,
                height: self.display_height,
            });
        }
        if self.health_check_interval_ms == 0 {
            return Err(ConfigError::ZeroHealthInterval);
        }

        Ok(AgentConfig {
            server_url,
            device_token,
            display: DisplaySize {
                width: self.display_width,
                height: self.display_height,
            },
            kiosk_mode: self.kiosk_mode,
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            screenshot_interval: clamp_screenshot_interval(self.screenshot_interval_ms),
            log_level: self.log_level,
            browser_path: self.browser_path,
            browser_user_data_dir: self.browser_user_data_dir,
        })
    }
}

impl AgentConfig {
    /// Applies persisted overrides on top of the startup values.
    pub fn apply_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(ms) = overrides.screenshot_interval_ms {
            self.screenshot_interval = clamp_screenshot_interval(ms);
        }
        if let Some(ms) = overrides.health_check_interval_ms.filter(|ms| *ms > 0) {
            self.health_check_interval = Duration::from_millis(ms);
        }
        if let Some(w) = overrides.display_width.filter(|w| *w > 0) {
            self.display.width = w;
        }
        if let Some(h) = overrides.display_height.filter(|h| *h > 0) {
            self.display.height = h;
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
    }
}

/// Raises intervals below [`MIN_SCREENSHOT_INTERVAL`] to the floor.
pub fn clamp_screenshot_interval(ms: u64) -> Duration {
    let requested = Duration::from_millis(ms);
    if requested < MIN_SCREENSHOT_INTERVAL {
        warn!(
            "screenshot interval {ms} ms is below the {} ms floor; using the floor",
            MIN_SCREENSHOT_INTERVAL.as_millis()
        );
        return MIN_SCREENSHOT_INTERVAL;
    }
    requested
}

// ── Runtime overrides ─────────────────────────────────────────────────────────

/// Settings changed by the server via `config-update`.
///
/// Stored as TOML so an operator can inspect or delete the file by hand:
///
/// ```toml
/// screenshot_interval_ms = 60000
/// log_level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl RuntimeOverrides {
    /// Merges a live update; absent fields keep their previous override.
    pub fn merge(&mut self, update: &ConfigUpdate) {
        if let Some(v) = update.screenshot_interval {
            self.screenshot_interval_ms = Some(v);
        }
        if let Some(v) = update.health_check_interval {
            self.health_check_interval_ms = Some(v);
        }
        if let Some(v) = update.display_width {
            self.display_width = Some(v);
        }
        if let Some(v) = update.display_height {
            self.display_height = Some(v);
        }
        if let Some(v) = &update.log_level {
            self.log_level = Some(v.clone());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            server_url: Some("https://signage.example.com".into()),
            device_token: Some("tok-123".into()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn test_valid_config_uses_defaults() {
        // Arrange / Act
        let cfg = raw().validate().unwrap();

        // Assert
        assert_eq!(cfg.display, DisplaySize { width: 1920, height: 1080 });
        assert!(cfg.kiosk_mode);
        assert_eq!(cfg.health_check_interval, Duration::from_secs(60));
        assert_eq!(cfg.screenshot_interval, Duration::from_secs(300));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_missing_server_url_is_fatal() {
        let cfg = RawConfig {
            server_url: None,
            ..raw()
        };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MissingServerUrl);
    }

    #[test]
    fn test_blank_token_is_fatal() {
        let cfg = RawConfig {
            device_token: Some("   ".into()),
            ..raw()
        };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MissingDeviceToken);
    }

    #[test]
    fn test_unparsable_origin_is_fatal() {
        let cfg = RawConfig {
            server_url: Some("not a url".into()),
            ..raw()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidServerUrl { .. })));
    }

    #[test]
    fn test_non_http_scheme_is_fatal() {
        let cfg = RawConfig {
            server_url: Some("ftp://signage.example.com".into()),
            ..raw()
        };
        assert_eq!(
            cfg.validate().unwrap_err(),
            ConfigError::UnsupportedScheme("ftp".into())
        );
    }

    #[test]
    fn test_screenshot_interval_is_clamped_to_floor() {
        let cfg = RawConfig {
            screenshot_interval_ms: 5_000,
            ..raw()
        };
        assert_eq!(cfg.validate().unwrap().screenshot_interval, MIN_SCREENSHOT_INTERVAL);
    }

    #[test]
    fn test_zero_display_is_rejected() {
        let cfg = RawConfig {
            display_width: 0,
            ..raw()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidDisplaySize { .. })));
    }

    #[test]
    fn test_overrides_merge_keeps_previous_values() {
        // Arrange
        let mut overrides = RuntimeOverrides {
            log_level: Some("debug".into()),
            ..Default::default()
        };

        // Act
        overrides.merge(&ConfigUpdate {
            screenshot_interval: Some(60_000),
            ..Default::default()
        });

        // Assert
        assert_eq!(overrides.screenshot_interval_ms, Some(60_000));
        assert_eq!(overrides.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_apply_overrides_clamps_and_ignores_zero() {
        let mut cfg = raw().validate().unwrap();
        cfg.apply_overrides(&RuntimeOverrides {
            screenshot_interval_ms: Some(1_000),
            health_check_interval_ms: Some(0),
            display_width: Some(1280),
            display_height: Some(720),
            log_level: None,
        });
        assert_eq!(cfg.screenshot_interval, MIN_SCREENSHOT_INTERVAL);
        assert_eq!(cfg.health_check_interval, Duration::from_secs(60));
        assert_eq!(cfg.display, DisplaySize { width: 1280, height: 720 });
    }

    #[test]
    fn test_overrides_toml_round_trip_omits_unset_fields() {
        let overrides = RuntimeOverrides {
            health_check_interval_ms: Some(30_000),
            ..Default::default()
        };
        let text = toml::to_string(&overrides).unwrap();
        assert_eq!(text.trim(), "health_check_interval_ms = 30000");
        let back: RuntimeOverrides = toml::from_str(&text).unwrap();
        assert_eq!(back, overrides);
    }
}
