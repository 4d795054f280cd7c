//! StreamController: the DevTools screencast live view.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//!  start ──▶ [inject heartbeat] ──▶ [start screencast] ──▶ frames ──▶ …
//!                                          │                 │
//!                   no first frame in 10s ─┤     no frame in 30s (checked every 10s)
//!                                          ▼                 ▼
//!                                       restart ◀────────────┘
//! ```
//!
//! Every frame is forwarded to the server, acknowledged straight away (the
//! browser stops sending after a few unacknowledged frames), and stamped into
//! the session's "last frame" marker.
//!
//! Static pages never repaint, so the session injects a 1-pixel element that
//! flips colour ten times a second.  That keeps frames arriving and lets the
//! watchdog tell a stalled stream from a quiet page.
//!
//! A session is never repaired in place.  Restarting tears it down and builds
//! a new one with the same parameters.  Watchdog tasks do not restart the
//! session themselves: they post a request to a supervisor task, which drops
//! requests for sessions that no longer exist and ignores requests while a
//! restart is already running.  A restart that fails is retried with
//! exponential backoff until it succeeds or the stream is stopped or started
//! afresh.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use signage_core::domain::noise::is_parameter_validation_error;
use signage_core::domain::recovery::Backoff;
use signage_core::protocol::messages::{ErrorKind, ErrorReport, OutboundEvent, ScreencastFrame};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::driver::{DriverError, DriverEvent, ScreencastParams, SurfaceId};
use crate::application::render::RenderController;
use crate::application::telemetry::Telemetry;

/// How often the watchdog looks at the last-frame marker.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(10);

/// A session with no frame for this long is restarted.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A session whose first frame has not arrived after this long is restarted.
pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// First delay before retrying a failed restart.
pub const RESTART_RETRY_BASE: Duration = Duration::from_secs(2);

/// Upper bound for the restart retry delay.
pub const RESTART_RETRY_MAX: Duration = Duration::from_secs(30);

/// Keeps the compositor producing frames on static pages.
const HEARTBEAT_SCRIPT: &str = r#"(() => {
  if (window.__signageHeartbeat) return;
  const install = () => {
    const dot = document.createElement('div');
    dot.setAttribute('aria-hidden', 'true');
    dot.style.cssText = 'position:fixed;right:0;bottom:0;width:1px;height:1px;' +
      'opacity:0.01;pointer-events:none;z-index:2147483647;';
    document.documentElement.appendChild(dot);
    let on = false;
    window.__signageHeartbeat = setInterval(() => {
      on = !on;
      dot.style.background = on ? '#000' : '#fff';
    }, 100);
  };
  if (document.documentElement) install();
  else document.addEventListener('DOMContentLoaded', install);
})()"#;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no live surface to stream")]
    NoSurface,

    #[error("screencast failed: {0}")]
    Driver(#[from] DriverError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartCause {
    NoFirstFrame,
    Stalled,
    SurfaceChanged,
}

#[derive(Debug)]
struct RestartRequest {
    session: Uuid,
    cause: RestartCause,
}

struct StreamSession {
    id: Uuid,
    surface: SurfaceId,
    params: ScreencastParams,
    last_frame_at: Arc<Mutex<Option<Instant>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamSession {
    fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at.lock().ok().and_then(|at| *at)
    }
}

pub struct StreamController {
    render: Arc<RenderController>,
    telemetry: Arc<dyn Telemetry>,
    session: Mutex<Option<StreamSession>>,
    restarting: AtomicBool,
    /// Bumped by every `start` and `stop` from outside; pending restart
    /// retries give up when it moves.
    intent: AtomicU64,
    restart_tx: mpsc::UnboundedSender<RestartRequest>,
}

impl StreamController {
    /// Creates the controller and its restart supervisor.
    pub fn spawn(render: Arc<RenderController>, telemetry: Arc<dyn Telemetry>) -> Arc<Self> {
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            render,
            telemetry,
            session: Mutex::new(None),
            restarting: AtomicBool::new(false),
            intent: AtomicU64::new(0),
            restart_tx,
        });
        tokio::spawn(supervise(Arc::downgrade(&this), restart_rx));
        this
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// When the current session last delivered a frame.
    pub fn last_frame_at(&self) -> Option<Instant> {
        self.session
            .lock()
            .ok()
            .and_then(|s| s.as_ref().and_then(StreamSession::last_frame_at))
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|session| session.id))
    }

    /// Tears down any running session and starts a new one.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NoSurface`] when no surface is open, or the
    /// driver error when the screencast cannot be started.  Driver errors are
    /// reported before being returned, except parameter-validation errors,
    /// which are only logged.
    pub async fn start(&self, params: ScreencastParams) -> Result<(), StreamError> {
        self.intent.fetch_add(1, Ordering::SeqCst);
        self.open(params).await
    }

    async fn open(&self, params: ScreencastParams) -> Result<(), StreamError> {
        self.teardown().await;

        let surface = self.render.live_surface().await.ok_or(StreamError::NoSurface)?;
        let driver = self.render.driver().clone();

        if let Err(e) = driver.add_init_script(&surface, HEARTBEAT_SCRIPT).await {
            debug!("heartbeat init script not installed: {e}");
        }
        if let Err(e) = driver.evaluate(&surface, HEARTBEAT_SCRIPT).await {
            debug!("heartbeat not injected into current page: {e}");
        }

        // Subscribe before starting so the first frame cannot be missed.
        let events = driver.subscribe();
        if let Err(e) = driver.start_screencast(&surface, params).await {
            self.report(&e);
            return Err(e.into());
        }

        let id = Uuid::new_v4();
        let last_frame_at = Arc::new(Mutex::new(None));
        info!(
            "screencast {id} started on {surface} ({}x{} q{})",
            params.max_width, params.max_height, params.quality
        );

        let tasks = vec![
            self.spawn_frame_pump(events, surface.clone(), last_frame_at.clone()),
            self.spawn_watchdog(id, last_frame_at.clone()),
            self.spawn_first_frame_timer(id, last_frame_at.clone()),
            self.spawn_surface_watcher(id, surface.clone()),
        ];

        let previous = self.session.lock().ok().and_then(|mut slot| {
            slot.replace(StreamSession {
                id,
                surface,
                params,
                last_frame_at,
                tasks,
            })
        });
        // A concurrent start may have slipped in while we awaited the driver.
        if let Some(previous) = previous {
            self.dispose(previous).await;
        }
        Ok(())
    }

    /// Stops the session and all of its timers.
    pub async fn stop(&self) {
        self.intent.fetch_add(1, Ordering::SeqCst);
        if self.teardown().await {
            info!("screencast stopped");
        }
    }

    async fn teardown(&self) -> bool {
        let session = self.session.lock().ok().and_then(|mut slot| slot.take());
        match session {
            Some(session) => {
                self.dispose(session).await;
                true
            }
            None => false,
        }
    }

    async fn dispose(&self, session: StreamSession) {
        for task in &session.tasks {
            task.abort();
        }
        if self.render.driver().is_alive(&session.surface).await {
            if let Err(e) = self.render.driver().stop_screencast(&session.surface).await {
                debug!("stopping screencast {} failed: {e}", session.id);
            }
        }
    }

    async fn restart(&self, request: RestartRequest) {
        let params = match self.session.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(session) if session.id == request.session => session.params,
                _ => {
                    debug!("dropping restart for old session {}", request.session);
                    return;
                }
            },
            Err(_) => return,
        };
        if self.restarting.swap(true, Ordering::SeqCst) {
            debug!("screencast restart already in progress");
            return;
        }

        warn!("restarting screencast {} ({:?})", request.session, request.cause);
        let intent = self.intent.load(Ordering::SeqCst);
        let mut backoff = Backoff::new(RESTART_RETRY_BASE, RESTART_RETRY_MAX);
        loop {
            match self.open(params).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "screencast restart failed (attempt {}): {e}; retrying in {}s",
                        backoff.attempt(),
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    if self.intent.load(Ordering::SeqCst) != intent {
                        debug!("stream was stopped or restarted; giving up retries");
                        break;
                    }
                }
            }
        }
        self.restarting.store(false, Ordering::SeqCst);
    }

    fn report(&self, err: &DriverError) {
        if let DriverError::Protocol { code, message } = err {
            if is_parameter_validation_error(*code, message) {
                warn!("screencast rejected its parameters: {message}");
                return;
            }
        }
        self.telemetry
            .report(ErrorReport::new(ErrorKind::Stream, err.to_string()));
    }

    // ── Session tasks ─────────────────────────────────────────────────────────

    fn spawn_frame_pump(
        &self,
        mut events: broadcast::Receiver<DriverEvent>,
        surface: SurfaceId,
        last_frame_at: Arc<Mutex<Option<Instant>>>,
    ) -> JoinHandle<()> {
        let driver = self.render.driver().clone();
        let telemetry = self.telemetry.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("frame pump lagged by {n} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let DriverEvent::ScreencastFrame {
                    surface: from,
                    session_id,
                    data,
                    metadata,
                } = event
                else {
                    continue;
                };
                if from != surface {
                    continue;
                }
                telemetry.emit(OutboundEvent::ScreencastFrame(ScreencastFrame { data, metadata }));
                if let Err(e) = driver.ack_screencast_frame(&surface, session_id).await {
                    debug!("frame ack failed: {e}");
                }
                if let Ok(mut at) = last_frame_at.lock() {
                    *at = Some(Instant::now());
                }
            }
        })
    }

    fn spawn_watchdog(&self, session: Uuid, last_frame_at: Arc<Mutex<Option<Instant>>>) -> JoinHandle<()> {
        let restart_tx = self.restart_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCHDOG_PERIOD);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let last = last_frame_at.lock().ok().and_then(|at| *at);
                if let Some(last) = last {
                    if last.elapsed() > STALL_TIMEOUT {
                        let _ = restart_tx.send(RestartRequest {
                            session,
                            cause: RestartCause::Stalled,
                        });
                        break;
                    }
                }
            }
        })
    }

    fn spawn_first_frame_timer(
        &self,
        session: Uuid,
        last_frame_at: Arc<Mutex<Option<Instant>>>,
    ) -> JoinHandle<()> {
        let restart_tx = self.restart_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FIRST_FRAME_TIMEOUT).await;
            let got_frame = last_frame_at.lock().map(|at| at.is_some()).unwrap_or(true);
            if !got_frame {
                let _ = restart_tx.send(RestartRequest {
                    session,
                    cause: RestartCause::NoFirstFrame,
                });
            }
        })
    }

    fn spawn_surface_watcher(&self, session: Uuid, surface: SurfaceId) -> JoinHandle<()> {
        let restart_tx = self.restart_tx.clone();
        let mut active = self.render.subscribe_surface();
        tokio::spawn(async move {
            active.borrow_and_update();
            while active.changed().await.is_ok() {
                let moved = matches!(&*active.borrow_and_update(), Some(now) if *now != surface);
                if moved {
                    let _ = restart_tx.send(RestartRequest {
                        session,
                        cause: RestartCause::SurfaceChanged,
                    });
                    break;
                }
            }
        })
    }
}

async fn supervise(controller: Weak<StreamController>, mut requests: mpsc::UnboundedReceiver<RestartRequest>) {
    while let Some(request) = requests.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.restart(request).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::PassthroughCache;
    use crate::infrastructure::mock::{DriverCall, MockBrowserDriver, RecordingTelemetry};
    use signage_core::protocol::messages::DisplaySize;
    use url::Url;

    struct Fixture {
        driver: Arc<MockBrowserDriver>,
        telemetry: Arc<RecordingTelemetry>,
        stream: Arc<StreamController>,
    }

    async fn fixture() -> Fixture {
        let driver = Arc::new(MockBrowserDriver::new());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let render = Arc::new(RenderController::new(
            driver.clone(),
            telemetry.clone(),
            Arc::new(PassthroughCache),
            Url::parse("https://signage.example.com").unwrap(),
            DisplaySize { width: 1920, height: 1080 },
        ));
        render.start().await.unwrap();
        let stream = StreamController::spawn(render, telemetry.clone());
        Fixture {
            driver,
            telemetry,
            stream,
        }
    }

    fn screencast_starts(driver: &MockBrowserDriver) -> usize {
        driver
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::StartScreencast(_)))
            .count()
    }

    async fn yield_now() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_forwarded_and_acknowledged() {
        // Arrange
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();

        // Act
        f.driver.emit_frame("page-1", 41);
        f.driver.emit_frame("page-1", 42);
        yield_now().await;

        // Assert
        assert_eq!(f.telemetry.frames().len(), 2);
        let calls = f.driver.calls();
        assert!(calls.contains(&DriverCall::AckFrame(41)));
        assert!(calls.contains(&DriverCall::AckFrame(42)));
        assert!(f.stream.last_frame_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_injects_heartbeat() {
        let f = fixture().await;

        f.stream.start(ScreencastParams::default()).await.unwrap();

        let calls = f.driver.calls();
        assert!(calls
            .iter()
            .any(|c| matches!(c, DriverCall::AddInitScript(js) if js.contains("__signageHeartbeat"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_restarts_stalled_session_once() {
        // Arrange: one frame, then silence.
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();
        let first = f.stream.session_id();
        f.driver.emit_frame("page-1", 1);
        yield_now().await;

        // Act
        tokio::time::sleep(Duration::from_secs(41)).await;
        f.driver.emit_frame("page-1", 2);
        yield_now().await;

        // Assert
        assert_eq!(screencast_starts(&f.driver), 2);
        assert_ne!(f.stream.session_id(), first);
        let last = f.stream.last_frame_at().unwrap();
        assert!(last.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_first_frame_restarts_session() {
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();

        tokio::time::sleep(FIRST_FRAME_TIMEOUT + Duration::from_millis(5)).await;

        assert_eq!(screencast_starts(&f.driver), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_frames_never_restart() {
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();

        for n in 0..12 {
            f.driver.emit_frame("page-1", n);
            tokio::time::sleep(Duration::from_secs(5)).await;
        }

        assert_eq!(screencast_starts(&f.driver), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_switch_recreates_session() {
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();
        f.driver.emit_frame("page-1", 1);
        yield_now().await;

        f.driver.open_surface("popup-2");
        yield_now().await;
        yield_now().await;

        assert_eq!(screencast_starts(&f.driver), 2);
        assert!(f
            .driver
            .calls()
            .contains(&DriverCall::StopScreencast("page-1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameter_errors_are_not_reported() {
        let f = fixture().await;
        f.driver.fail_screencast(DriverError::Protocol {
            code: Some(-32602),
            message: "Invalid parameters".into(),
        });

        let result = f.stream.start(ScreencastParams::default()).await;

        assert!(result.is_err());
        assert!(f.telemetry.errors().is_empty());
        assert!(!f.stream.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_screencast_errors_are_reported() {
        let f = fixture().await;
        f.driver
            .fail_screencast(DriverError::Connection("socket closed".into()));

        let _ = f.stream.start(ScreencastParams::default()).await;

        let errors = f.telemetry.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Stream);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restart_is_retried_until_it_succeeds() {
        // Arrange: the first-frame restart hits a transient error.
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();
        f.driver
            .fail_screencast(DriverError::Connection("socket closed".into()));

        // Act
        tokio::time::sleep(FIRST_FRAME_TIMEOUT + Duration::from_millis(5)).await;
        let after_failure = f.stream.is_active();
        tokio::time::sleep(RESTART_RETRY_BASE + Duration::from_millis(5)).await;

        // Assert
        assert!(!after_failure);
        assert!(f.stream.is_active());
        assert_eq!(screencast_starts(&f.driver), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_restart_retries() {
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();
        f.driver
            .fail_screencast(DriverError::Connection("socket closed".into()));
        tokio::time::sleep(FIRST_FRAME_TIMEOUT + Duration::from_millis(5)).await;

        f.stream.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(!f.stream.is_active());
        assert_eq!(screencast_starts(&f.driver), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_session_and_timers() {
        let f = fixture().await;
        f.stream.start(ScreencastParams::default()).await.unwrap();

        f.stream.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(!f.stream.is_active());
        assert_eq!(screencast_starts(&f.driver), 1);
    }
}
