//! Signage device agent entry point.
//!
//! Wires together the control channel, the browser driver, the content
//! scheduler, and the telemetry loops, then runs the Tokio event loop.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ Cli::parse() → RawConfig::validate()   -- fatal on bad config
//!  └─ TomlOverrideStore::load()               -- persisted config-update values
//!  └─ RenderController::start()               -- launches the browser
//!  └─ ContentScheduler::spawn()               -- rotation actor
//!  └─ ControlChannel::start()                 -- WebSocket reconnect loop
//!  └─ event dispatch loop
//!       ├─ Connected / Disconnected           -- log only
//!       └─ Event(InboundEvent)                -- HandlerRegistry::dispatch
//! ```
//!
//! # Event dispatch loop (for beginners)
//!
//! The `select!` loop at the bottom of `main` is the heart of the agent.  It
//! takes one inbound event at a time, in arrival order, and hands it to the
//! single handler registered for its kind.  Handlers never block: anything
//! that waits on the browser is queued on a task lane.  The loop ends when
//! Ctrl-C or SIGTERM arrives, or when the server asks for a restart.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

use signage_agent::application::dispatch::{
    wire_handlers, AgentComponents, HandlerRegistry, ShutdownReason,
};
use signage_agent::application::health::spawn_health_loop;
use signage_agent::application::input::RemoteInput;
use signage_agent::application::render::{DisplayQueue, RenderController};
use signage_agent::application::scheduler::{ContentScheduler, SchedulerDeps};
use signage_agent::application::screenshots::ScreenshotService;
use signage_agent::application::settings::{LogControl, OverrideStore, RuntimeSettings};
use signage_agent::application::stream::StreamController;
use signage_agent::application::telemetry::Telemetry;
use signage_agent::domain::config::{
    RawConfig, DEFAULT_DISPLAY_HEIGHT, DEFAULT_DISPLAY_WIDTH, DEFAULT_HEALTH_CHECK_INTERVAL_MS,
    DEFAULT_LOG_LEVEL, DEFAULT_SCREENSHOT_INTERVAL_MS,
};
use signage_agent::infrastructure::cache::PassthroughCache;
use signage_agent::infrastructure::cdp::{CdpDriver, LaunchOptions};
use signage_agent::infrastructure::control::{ChannelEvent, ControlChannel};
use signage_agent::infrastructure::health::SysinfoHealthSampler;
use signage_agent::infrastructure::storage::TomlOverrideStore;
use signage_core::protocol::messages::{
    DeviceRegistration, DeviceStatus, DeviceStatusKind, OutboundEvent,
};
use signage_core::SystemClock;

/// Exit status after a server-requested restart.  The service manager is
/// expected to start the agent again.
const RESTART_EXIT_CODE: u8 = 75;

/// Time allowed for flushing queued events when shutting down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Digital signage device agent.
///
/// Every flag can also be given as an environment variable, which is how the
/// agent is usually configured on a device.
#[derive(Debug, Parser)]
#[command(
    name = "signage-agent",
    about = "Plays scheduled content in a kiosk browser and reports to the signage server",
    version
)]
struct Cli {
    /// Server origin, e.g. `https://signage.example.com`.
    #[arg(long, env = "SERVER_URL")]
    server_url: Option<String>,

    /// Opaque device credential sent when registering.
    #[arg(long, env = "DEVICE_TOKEN", hide_env_values = true)]
    device_token: Option<String>,

    #[arg(long, default_value_t = DEFAULT_DISPLAY_WIDTH, env = "DISPLAY_WIDTH")]
    display_width: u32,

    #[arg(long, default_value_t = DEFAULT_DISPLAY_HEIGHT, env = "DISPLAY_HEIGHT")]
    display_height: u32,

    /// Run the browser full-screen without browser chrome.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "KIOSK_MODE")]
    kiosk_mode: bool,

    /// Health report interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_HEALTH_CHECK_INTERVAL_MS, env = "HEALTH_CHECK_INTERVAL")]
    health_check_interval: u64,

    /// Periodic screenshot interval in milliseconds (at least 30000).
    #[arg(long, default_value_t = DEFAULT_SCREENSHOT_INTERVAL_MS, env = "SCREENSHOT_INTERVAL")]
    screenshot_interval: u64,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "LOG_LEVEL")]
    log_level: String,

    /// Browser executable.
    #[arg(long, default_value = "chromium", env = "BROWSER_PATH")]
    browser_path: std::path::PathBuf,

    /// Browser profile directory; a temporary profile is used when unset.
    #[arg(long, env = "BROWSER_USER_DATA_DIR")]
    browser_user_data_dir: Option<std::path::PathBuf>,
}

impl Cli {
    fn into_raw_config(self) -> RawConfig {
        RawConfig {
            server_url: self.server_url,
            device_token: self.device_token,
            display_width: self.display_width,
            display_height: self.display_height,
            kiosk_mode: self.kiosk_mode,
            health_check_interval_ms: self.health_check_interval,
            screenshot_interval_ms: self.screenshot_interval,
            log_level: self.log_level,
            browser_path: self.browser_path,
            browser_user_data_dir: self.browser_user_data_dir,
        }
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// [`LogControl`] over a reloadable `EnvFilter`.
struct ReloadLogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogControl for ReloadLogControl {
    fn set_level(&self, directive: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
        self.handle.reload(filter).map_err(|e| e.to_string())
    }
}

/// Installs the global subscriber.  `RUST_LOG` wins over `log_level`.
fn init_logging(log_level: &str) -> ReloadLogControl {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    ReloadLogControl { handle }
}

// ── Signals ───────────────────────────────────────────────────────────────────

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!("cannot listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let logs = Arc::new(init_logging(&cli.log_level));

    let base = cli
        .into_raw_config()
        .validate()
        .context("invalid configuration")?;

    info!(
        "signage agent {} starting; server={}, display={}x{}",
        env!("CARGO_PKG_VERSION"),
        base.server_url,
        base.display.width,
        base.display.height
    );

    // ── Persisted overrides ───────────────────────────────────────────────────
    let store: Arc<dyn OverrideStore> = match TomlOverrideStore::at_default_location() {
        Ok(store) => {
            info!("runtime overrides at {}", store.path().display());
            Arc::new(store)
        }
        Err(e) => {
            warn!("overrides will not persist: {e}");
            Arc::new(TomlOverrideStore::at(std::env::temp_dir().join("signage-agent-overrides.toml")))
        }
    };
    let overrides = store.load().unwrap_or_else(|e| {
        warn!("ignoring saved overrides: {e}");
        Default::default()
    });
    let mut config = base.clone();
    config.apply_overrides(&overrides);
    if config.log_level != base.log_level && std::env::var_os("RUST_LOG").is_none() {
        if let Err(e) = logs.set_level(&config.log_level) {
            warn!("saved log level '{}' rejected: {e}", config.log_level);
        }
    }

    // ── Control channel ───────────────────────────────────────────────────────
    let channel = Arc::new(
        ControlChannel::new(
            &config.server_url,
            DeviceRegistration {
                token: config.device_token.clone(),
                agent_version: env!("CARGO_PKG_VERSION").to_string(),
                display: config.display,
            },
        )
        .context("cannot build control channel")?,
    );
    let telemetry: Arc<dyn Telemetry> = Arc::new(channel.sender());

    // ── Browser and render surface ────────────────────────────────────────────
    let driver = Arc::new(CdpDriver::new(LaunchOptions {
        browser_path: config.browser_path.clone(),
        user_data_dir: config.browser_user_data_dir.clone(),
        kiosk: config.kiosk_mode,
        window: config.display,
    }));
    let cache = Arc::new(PassthroughCache);
    let render = Arc::new(RenderController::new(
        driver,
        telemetry.clone(),
        cache.clone(),
        config.server_url.clone(),
        config.display,
    ));
    render.start().await.context("cannot start the browser")?;

    // ── Components ────────────────────────────────────────────────────────────
    let screenshots = Arc::new(ScreenshotService::new(
        render.clone(),
        telemetry.clone(),
        config.screenshot_interval,
    ));
    screenshots.start();
    let stream = StreamController::spawn(render.clone(), telemetry.clone());
    let input = Arc::new(RemoteInput::new(render.clone()));

    let (health_tx, health_rx) = watch::channel(config.health_check_interval);
    let health = spawn_health_loop(
        Arc::new(SysinfoHealthSampler::new()),
        telemetry.clone(),
        render.clone(),
        health_rx,
    );

    let settings = Arc::new(RuntimeSettings::new(
        base,
        overrides,
        store,
        screenshots.clone(),
        health_tx,
        render.clone(),
        logs,
    ));

    let display = Arc::new(DisplayQueue::spawn(render.clone()));
    let (scheduler, scheduler_task) = ContentScheduler::spawn(SchedulerDeps {
        display,
        telemetry: telemetry.clone(),
        cadence: screenshots.clone(),
        clock: Arc::new(SystemClock),
    });

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::new();
    wire_handlers(
        &registry,
        Arc::new(AgentComponents {
            scheduler: scheduler.clone(),
            render: render.clone(),
            stream: stream.clone(),
            input,
            screenshots: screenshots.clone(),
            settings,
            cache,
            telemetry: telemetry.clone(),
            shutdown: shutdown_tx,
        }),
    );

    // ── Main event dispatch loop ──────────────────────────────────────────────
    let mut events = channel.clone().start();
    info!("signage agent ready; connecting to {}", channel.url());

    let reason = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ChannelEvent::Connected) => info!("registered with server"),
                Some(ChannelEvent::Disconnected) => warn!("control channel down; reconnecting"),
                Some(ChannelEvent::Event(event)) => {
                    let kind = event.kind();
                    if !registry.dispatch(event) {
                        warn!("no handler for {kind}");
                    }
                }
                None => {
                    error!("control channel stopped");
                    break ShutdownReason::Signal;
                }
            },
            reason = shutdown_rx.recv() => break reason.unwrap_or(ShutdownReason::Signal),
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C");
                break ShutdownReason::Signal;
            }
            _ = terminate_signal() => {
                info!("received SIGTERM");
                break ShutdownReason::Signal;
            }
        }
    };

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    info!("shutting down ({reason:?})");
    if let Err(e) = scheduler.shutdown() {
        warn!("scheduler already stopped: {e}");
    }
    stream.stop().await;
    screenshots.stop();
    health.abort();
    telemetry.emit(OutboundEvent::DeviceStatus(DeviceStatus {
        status: DeviceStatusKind::Offline,
        message: Some(match reason {
            ShutdownReason::Signal => "agent stopped".to_string(),
            ShutdownReason::RestartRequested => "restarting".to_string(),
        }),
    }));
    channel.close(SHUTDOWN_GRACE).await;
    render.shutdown().await;
    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler_task).await.is_err() {
        warn!("scheduler did not stop in time");
    }

    info!("signage agent stopped");
    Ok(match reason {
        ShutdownReason::Signal => ExitCode::SUCCESS,
        ShutdownReason::RestartRequested => ExitCode::from(RESTART_EXIT_CODE),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
