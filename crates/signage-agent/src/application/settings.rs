//! Live configuration changes pushed by `config-update`.
//!
//! An update is merged into the persisted [`RuntimeOverrides`], applied to
//! every component that cares, and written back to the override store so the
//! next start comes up with the same settings.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use signage_core::protocol::messages::ConfigUpdate;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::application::render::RenderController;
use crate::application::screenshots::ScreenshotService;
use crate::domain::config::{AgentConfig, RuntimeOverrides};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no configuration directory on this platform")]
    NoPlatformConfigDir,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize overrides: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Where overrides are kept between runs.
pub trait OverrideStore: Send + Sync {
    /// Returns the saved overrides, or the empty set if none were saved.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store exists but cannot be read.
    fn load(&self) -> Result<RuntimeOverrides, StorageError>;

    /// # Errors
    ///
    /// Returns [`StorageError`] if the overrides cannot be written.
    fn save(&self, overrides: &RuntimeOverrides) -> Result<(), StorageError>;
}

/// Changes log verbosity at runtime.
pub trait LogControl: Send + Sync {
    /// Installs `directive` (an `EnvFilter` string such as `debug`).
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the directive is rejected.
    fn set_level(&self, directive: &str) -> Result<(), String>;
}

pub struct RuntimeSettings {
    base: AgentConfig,
    overrides: Mutex<RuntimeOverrides>,
    store: Arc<dyn OverrideStore>,
    screenshots: Arc<ScreenshotService>,
    health_interval: watch::Sender<Duration>,
    render: Arc<RenderController>,
    logs: Arc<dyn LogControl>,
}

impl RuntimeSettings {
    /// `base` is the validated startup configuration *without* overrides;
    /// `overrides` are the ones loaded from the store.
    pub fn new(
        base: AgentConfig,
        overrides: RuntimeOverrides,
        store: Arc<dyn OverrideStore>,
        screenshots: Arc<ScreenshotService>,
        health_interval: watch::Sender<Duration>,
        render: Arc<RenderController>,
        logs: Arc<dyn LogControl>,
    ) -> Self {
        Self {
            base,
            overrides: Mutex::new(overrides),
            store,
            screenshots,
            health_interval,
            render,
            logs,
        }
    }

    /// The startup configuration with every override applied.
    pub fn effective(&self) -> AgentConfig {
        let mut config = self.base.clone();
        if let Ok(overrides) = self.overrides.lock() {
            config.apply_overrides(&overrides);
        }
        config
    }

    pub fn overrides(&self) -> RuntimeOverrides {
        self.overrides
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    /// Applies a `config-update` and persists the result.
    pub async fn apply(&self, update: &ConfigUpdate) {
        if update.is_empty() {
            return;
        }
        let snapshot = match self.overrides.lock() {
            Ok(mut overrides) => {
                overrides.merge(update);
                overrides.clone()
            }
            Err(_) => return,
        };
        let config = self.effective();

        if update.screenshot_interval.is_some() {
            self.screenshots.set_interval(config.screenshot_interval);
        }
        if update.health_check_interval.is_some() {
            info!("health interval set to {}ms", config.health_check_interval.as_millis());
            self.health_interval.send_replace(config.health_check_interval);
        }
        if update.display_width.is_some() || update.display_height.is_some() {
            info!("display size set to {}x{}", config.display.width, config.display.height);
            self.render
                .set_viewport(config.display.width, config.display.height)
                .await;
        }
        if update.log_level.is_some() {
            match self.logs.set_level(&config.log_level) {
                Ok(()) => info!("log level set to {}", config.log_level),
                Err(e) => warn!("log level {:?} rejected: {e}", config.log_level),
            }
        }

        if let Err(e) = self.store.save(&snapshot) {
            warn!("runtime overrides not persisted: {e}");
        }
    }
}
