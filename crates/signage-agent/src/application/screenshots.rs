//! Screenshot cadence service.
//!
//! Three independent sources of screenshots share one capturer:
//!
//! - **Periodic**: while the scheduler shows static content, capture every
//!   screenshot interval.
//! - **Once per rotation**: while content rotates, capture once, a few
//!   seconds after each item appears (after it has had time to paint).
//! - **Live preview**: the low-rate `stream-start` preview, independent of
//!   the two above.
//!
//! `screenshot-request` bypasses all of them with [`ScreenshotService::capture_now`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use signage_core::protocol::messages::{timestamp_now, OutboundEvent, ScreenshotUpload};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::telemetry::Telemetry;

/// Delay between an item appearing and its per-rotation capture.
pub const ROTATION_CAPTURE_DELAY: Duration = Duration::from_secs(3);

/// Default live-preview interval.
pub const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_millis(2000);

/// Fastest allowed live-preview interval.
pub const MIN_PREVIEW_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Capture every screenshot interval.
    Periodic,
    /// Capture once per displayed item.
    OncePerRotation,
}

/// How the scheduler steers screenshot timing.
pub trait CaptureCadence: Send + Sync {
    fn set_policy(&self, policy: CapturePolicy);

    /// Called each time a new item is put on screen.
    fn item_displayed(&self);
}

/// Produces single frames of the active surface.
#[async_trait]
pub trait FrameCapturer: Send + Sync {
    /// Base64 JPEG of the active surface, or `None` if nothing can be
    /// captured right now.
    async fn capture(&self) -> Option<String>;

    fn current_url(&self) -> Option<String>;
}

pub struct ScreenshotService {
    capturer: Arc<dyn FrameCapturer>,
    telemetry: Arc<dyn Telemetry>,
    policy: watch::Sender<CapturePolicy>,
    interval: watch::Sender<Duration>,
    rotation_capture: Mutex<Option<JoinHandle<()>>>,
    preview: Mutex<Option<JoinHandle<()>>>,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl ScreenshotService {
    pub fn new(
        capturer: Arc<dyn FrameCapturer>,
        telemetry: Arc<dyn Telemetry>,
        interval: Duration,
    ) -> Self {
        Self {
            capturer,
            telemetry,
            policy: watch::Sender::new(CapturePolicy::OncePerRotation),
            interval: watch::Sender::new(interval),
            rotation_capture: Mutex::new(None),
            preview: Mutex::new(None),
            periodic: Mutex::new(None),
        }
    }

    /// Spawns the periodic capture loop.  Calling it again restarts the loop.
    pub fn start(&self) {
        let capturer = self.capturer.clone();
        let telemetry = self.telemetry.clone();
        let mut policy = self.policy.subscribe();
        let mut interval = self.interval.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let every = *interval.borrow_and_update();
                let periodic = *policy.borrow_and_update() == CapturePolicy::Periodic;
                tokio::select! {
                    _ = tokio::time::sleep(every), if periodic => {
                        upload(capturer.as_ref(), telemetry.as_ref(), false).await;
                    }
                    changed = interval.changed() => {
                        if changed.is_err() { break; }
                    }
                    changed = policy.changed() => {
                        if changed.is_err() { break; }
                    }
                }
            }
        });
        replace_task(&self.periodic, Some(task));
    }

    /// Stops every capture loop and pending capture.
    pub fn stop(&self) {
        replace_task(&self.periodic, None);
        replace_task(&self.preview, None);
        replace_task(&self.rotation_capture, None);
    }

    /// Changes the periodic interval; takes effect immediately.
    pub fn set_interval(&self, interval: Duration) {
        info!("screenshot interval set to {}ms", interval.as_millis());
        self.interval.send_replace(interval);
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    pub fn policy(&self) -> CapturePolicy {
        *self.policy.borrow()
    }

    /// Captures and uploads one frame right away.
    pub async fn capture_now(&self, live: bool) {
        upload(self.capturer.as_ref(), self.telemetry.as_ref(), live).await;
    }

    /// Starts the low-rate live preview (`stream-start`).
    pub fn start_preview(&self, interval_ms: Option<u64>) {
        let every = interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PREVIEW_INTERVAL)
            .max(MIN_PREVIEW_INTERVAL);
        info!("live preview started every {}ms", every.as_millis());

        let capturer = self.capturer.clone();
        let telemetry = self.telemetry.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                upload(capturer.as_ref(), telemetry.as_ref(), true).await;
            }
        });
        replace_task(&self.preview, Some(task));
    }

    pub fn stop_preview(&self) {
        if replace_task(&self.preview, None) {
            info!("live preview stopped");
        }
    }

    pub fn is_previewing(&self) -> bool {
        self.preview
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }
}

impl CaptureCadence for ScreenshotService {
    fn set_policy(&self, policy: CapturePolicy) {
        self.policy.send_if_modified(|current| {
            if *current == policy {
                return false;
            }
            debug!("screenshot policy {current:?} -> {policy:?}");
            *current = policy;
            true
        });
    }

    fn item_displayed(&self) {
        if self.policy() != CapturePolicy::OncePerRotation {
            return;
        }
        let capturer = self.capturer.clone();
        let telemetry = self.telemetry.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(ROTATION_CAPTURE_DELAY).await;
            upload(capturer.as_ref(), telemetry.as_ref(), false).await;
        });
        replace_task(&self.rotation_capture, Some(task));
    }
}

impl Drop for ScreenshotService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Swaps the task in `slot`, aborting the old one.  Returns `true` if a task
/// was running.
fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, task: Option<JoinHandle<()>>) -> bool {
    let previous = match slot.lock() {
        Ok(mut guard) => std::mem::replace(&mut *guard, task),
        Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), task),
    };
    match previous {
        Some(old) => {
            old.abort();
            true
        }
        None => false,
    }
}

async fn upload(capturer: &dyn FrameCapturer, telemetry: &dyn Telemetry, live: bool) {
    let Some(image) = capturer.capture().await else {
        debug!("screenshot skipped: nothing to capture");
        return;
    };
    telemetry.emit(OutboundEvent::ScreenshotUpload(ScreenshotUpload {
        image,
        current_url: capturer.current_url(),
        live,
        timestamp: timestamp_now(),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{FixedCapturer, RecordingTelemetry};

    fn service(interval: Duration) -> (ScreenshotService, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let capturer = Arc::new(FixedCapturer::new("aGVsbG8=", "https://example.com/"));
        (ScreenshotService::new(capturer, telemetry.clone(), interval), telemetry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_policy_captures_every_interval() {
        // Arrange
        let (svc, telemetry) = service(Duration::from_secs(30));
        svc.set_policy(CapturePolicy::Periodic);
        svc.start();

        // Act
        tokio::time::sleep(Duration::from_secs(95)).await;

        // Assert
        assert_eq!(telemetry.screenshots().len(), 3);
        assert!(telemetry.screenshots().iter().all(|s| !s.live));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_policy_captures_once_per_item() {
        let (svc, telemetry) = service(Duration::from_secs(30));
        svc.start();

        svc.item_displayed();
        tokio::time::sleep(Duration::from_secs(1)).await;
        // A second item before the first capture fired replaces it.
        svc.item_displayed();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(telemetry.screenshots().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_interval_has_a_floor() {
        let (svc, telemetry) = service(Duration::from_secs(300));

        svc.start_preview(Some(100));
        tokio::time::sleep(Duration::from_millis(1_010)).await;
        svc.stop_preview();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Ticks at 0, 500 and 1000 ms.
        let shots = telemetry.screenshots();
        assert_eq!(shots.len(), 3);
        assert!(shots.iter().all(|s| s.live));
        assert!(!svc.is_previewing());
    }

    #[tokio::test]
    async fn test_capture_now_uploads_current_url() {
        let (svc, telemetry) = service(Duration::from_secs(300));

        svc.capture_now(false).await;

        let shots = telemetry.screenshots();
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].image, "aGVsbG8=");
        assert_eq!(shots[0].current_url.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_set_interval_is_visible() {
        let (svc, _) = service(Duration::from_secs(300));
        svc.set_interval(Duration::from_secs(60));
        assert_eq!(svc.interval(), Duration::from_secs(60));
    }
}
