//! Recording fakes for the application ports.
//!
//! # Why fakes? (for beginners)
//!
//! The real adapters start Chromium, open WebSockets, and write files.  The
//! fakes below replace all of that with in-memory recording: every call is
//! pushed into a `Mutex<Vec<...>>` so a test can assert exactly what was asked
//! for, and in which order.
//!
//! ```ignore
//! let driver = Arc::new(MockBrowserDriver::new());
//! let render = Arc::new(RenderController::new(driver.clone(), /* ... */));
//! render.start().await?;
//!
//! render.navigate_to("/menu").await?;
//! assert_eq!(driver.navigations().len(), 1);
//! ```
//!
//! [`MockBrowserDriver`] also lets a test script failures
//! ([`MockBrowserDriver::script_navigation`]) and push browser events
//! ([`MockBrowserDriver::open_surface`], [`MockBrowserDriver::emit_frame`]).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use signage_core::domain::navigation::WaitStrategy;
use signage_core::protocol::messages::{
    ErrorReport, FrameMetadata, HealthReport, OutboundEvent, ScreencastFrame, ScreenshotUpload,
};
use signage_core::{DisplayTarget, PlaybackStateSnapshot};
use tokio::sync::broadcast;

use crate::application::driver::{
    BrowserDriver, DriverError, DriverEvent, KeyAction, KeyInput, MouseInput, ScreencastParams, SurfaceId,
};
use crate::application::scheduler::ContentDisplay;
use crate::application::screenshots::{CaptureCadence, CapturePolicy, FrameCapturer};
use crate::application::settings::{LogControl, OverrideStore, StorageError};
use crate::application::telemetry::Telemetry;
use crate::domain::config::RuntimeOverrides;

/// The surface every fresh mock browser opens with.
pub const INITIAL_SURFACE: &str = "page-1";

/// Base64 payload returned for screenshots and frames.
pub const FAKE_JPEG: &str = "/9j/4AAQSkZJRg==";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

/// Records every outbound event.
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<OutboundEvent> {
        lock(&self.events).clone()
    }

    pub fn playback_states(&self) -> Vec<PlaybackStateSnapshot> {
        self.filter(|e| match e {
            OutboundEvent::PlaybackState(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn screenshots(&self) -> Vec<ScreenshotUpload> {
        self.filter(|e| match e {
            OutboundEvent::ScreenshotUpload(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.filter(|e| match e {
            OutboundEvent::ErrorReport(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn frames(&self) -> Vec<ScreencastFrame> {
        self.filter(|e| match e {
            OutboundEvent::ScreencastFrame(f) => Some(f.clone()),
            _ => None,
        })
    }

    pub fn health_reports(&self) -> Vec<HealthReport> {
        self.filter(|e| match e {
            OutboundEvent::HealthReport(h) => Some(h.clone()),
            _ => None,
        })
    }

    fn filter<T>(&self, pick: impl Fn(&OutboundEvent) -> Option<T>) -> Vec<T> {
        lock(&self.events).iter().filter_map(pick).collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn emit(&self, event: OutboundEvent) {
        lock(&self.events).push(event);
    }
}

// ── Scheduler collaborators ───────────────────────────────────────────────────

/// Records every display target the scheduler asks for.
#[derive(Default)]
pub struct RecordingDisplay {
    targets: Mutex<Vec<DisplayTarget>>,
}

impl RecordingDisplay {
    pub fn targets(&self) -> Vec<DisplayTarget> {
        lock(&self.targets).clone()
    }

    /// URLs of the playlist items shown, in order.
    pub fn urls(&self) -> Vec<String> {
        lock(&self.targets)
            .iter()
            .filter_map(|t| match t {
                DisplayTarget::Item { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ContentDisplay for RecordingDisplay {
    fn show(&self, target: DisplayTarget) {
        lock(&self.targets).push(target);
    }
}

/// Records capture-policy changes.
#[derive(Default)]
pub struct RecordingCadence {
    policies: Mutex<Vec<CapturePolicy>>,
    displayed: Mutex<usize>,
}

impl RecordingCadence {
    pub fn policies(&self) -> Vec<CapturePolicy> {
        lock(&self.policies).clone()
    }

    pub fn items_displayed(&self) -> usize {
        *lock(&self.displayed)
    }
}

impl CaptureCadence for RecordingCadence {
    fn set_policy(&self, policy: CapturePolicy) {
        lock(&self.policies).push(policy);
    }

    fn item_displayed(&self) {
        *lock(&self.displayed) += 1;
    }
}

/// Returns the same image and URL every time.
pub struct FixedCapturer {
    image: String,
    url: String,
}

impl FixedCapturer {
    /// An empty `image` means "nothing to capture".
    pub fn new(image: &str, url: &str) -> Self {
        Self {
            image: image.to_string(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl FrameCapturer for FixedCapturer {
    async fn capture(&self) -> Option<String> {
        (!self.image.is_empty()).then(|| self.image.clone())
    }

    fn current_url(&self) -> Option<String> {
        (!self.url.is_empty()).then(|| self.url.clone())
    }
}

// ── Settings collaborators ────────────────────────────────────────────────────

/// Keeps overrides in memory.
#[derive(Default)]
pub struct MemoryOverrideStore {
    saved: Mutex<Option<RuntimeOverrides>>,
}

impl MemoryOverrideStore {
    /// The last overrides written, if any.
    pub fn saved(&self) -> Option<RuntimeOverrides> {
        lock(&self.saved).clone()
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn load(&self) -> Result<RuntimeOverrides, StorageError> {
        Ok(self.saved().unwrap_or_default())
    }

    fn save(&self, overrides: &RuntimeOverrides) -> Result<(), StorageError> {
        *lock(&self.saved) = Some(overrides.clone());
        Ok(())
    }
}

/// Records requested log levels.
#[derive(Default)]
pub struct RecordingLogControl {
    levels: Mutex<Vec<String>>,
}

impl RecordingLogControl {
    pub fn levels(&self) -> Vec<String> {
        lock(&self.levels).clone()
    }
}

impl LogControl for RecordingLogControl {
    fn set_level(&self, directive: &str) -> Result<(), String> {
        lock(&self.levels).push(directive.to_string());
        Ok(())
    }
}

// ── Browser driver ────────────────────────────────────────────────────────────

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Launch,
    Shutdown,
    Attach(SurfaceId),
    Navigate { url: String, wait: WaitStrategy },
    SetDocument(String),
    Reload,
    SetViewport(u32, u32),
    Evaluate(String),
    AddInitScript(String),
    Screenshot,
    StartScreencast(ScreencastParams),
    AckFrame(i64),
    StopScreencast(SurfaceId),
    Mouse(MouseInput),
    Key(KeyInput),
    InsertText(String),
}

#[derive(Default)]
struct BrowserState {
    running: bool,
    surfaces: Vec<SurfaceId>,
    calls: Vec<DriverCall>,
    navigation_results: VecDeque<Result<(), DriverError>>,
    evaluation_results: VecDeque<Value>,
    screencast_failure: Option<DriverError>,
    key_down_failure: Option<(String, DriverError)>,
}

/// An in-memory browser.
///
/// `launch` opens [`INITIAL_SURFACE`] without emitting an event.  Calls on a
/// surface that is not open fail with [`DriverError::SurfaceGone`] and are
/// not recorded.
pub struct MockBrowserDriver {
    state: Mutex<BrowserState>,
    events: broadcast::Sender<DriverEvent>,
}

impl Default for MockBrowserDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowserDriver {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(BrowserState::default()),
            events,
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Every navigation as `(url, wait)`, in order.
    pub fn navigations(&self) -> Vec<(String, WaitStrategy)> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::Navigate { url, wait } => Some((url.clone(), *wait)),
                _ => None,
            })
            .collect()
    }

    /// Queues the outcome of the next navigation.  Unscripted ones succeed.
    pub fn script_navigation(&self, result: Result<(), DriverError>) {
        lock(&self.state).navigation_results.push_back(result);
    }

    /// Queues the value of the next `evaluate`.  Unscripted ones are `null`.
    pub fn script_evaluation(&self, value: Value) {
        lock(&self.state).evaluation_results.push_back(value);
    }

    /// Makes the next `start_screencast` fail with `error`.
    pub fn fail_screencast(&self, error: DriverError) {
        lock(&self.state).screencast_failure = Some(error);
    }

    /// Makes the next key-down of `key` fail with `error`.  The attempt is
    /// still recorded.
    pub fn fail_key_down(&self, key: &str, error: DriverError) {
        lock(&self.state).key_down_failure = Some((key.to_string(), error));
    }

    /// Opens a new surface, as a popup would.
    pub fn open_surface(&self, surface: &str) {
        lock(&self.state).surfaces.push(surface.to_string());
        let _ = self.events.send(DriverEvent::SurfaceCreated(surface.to_string()));
    }

    pub fn close_surface(&self, surface: &str) {
        lock(&self.state).surfaces.retain(|s| s != surface);
        let _ = self.events.send(DriverEvent::SurfaceDestroyed(surface.to_string()));
    }

    pub fn crash_surface(&self, surface: &str) {
        let _ = self.events.send(DriverEvent::SurfaceCrashed(surface.to_string()));
    }

    pub fn page_error(&self, surface: &str, message: &str) {
        let _ = self.events.send(DriverEvent::PageError {
            surface: surface.to_string(),
            message: message.to_string(),
        });
    }

    pub fn emit_frame(&self, surface: &str, session_id: i64) {
        let _ = self.events.send(DriverEvent::ScreencastFrame {
            surface: surface.to_string(),
            session_id,
            data: FAKE_JPEG.to_string(),
            metadata: FrameMetadata::default(),
        });
    }

    /// Records `call` if `surface` is open.
    fn on_surface(&self, surface: &SurfaceId, call: DriverCall) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if !state.surfaces.contains(surface) {
            return Err(DriverError::SurfaceGone(surface.clone()));
        }
        state.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for MockBrowserDriver {
    async fn launch(&self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.calls.push(DriverCall::Launch);
        state.running = true;
        if state.surfaces.is_empty() {
            state.surfaces.push(INITIAL_SURFACE.to_string());
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.calls.push(DriverCall::Shutdown);
        state.running = false;
        state.surfaces.clear();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn surfaces(&self) -> Result<Vec<SurfaceId>, DriverError> {
        let state = lock(&self.state);
        if !state.running {
            return Err(DriverError::NotRunning);
        }
        Ok(state.surfaces.clone())
    }

    async fn attach(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::Attach(surface.clone()))
    }

    async fn is_alive(&self, surface: &SurfaceId) -> bool {
        lock(&self.state).surfaces.contains(surface)
    }

    async fn navigate(
        &self,
        surface: &SurfaceId,
        url: &str,
        wait: WaitStrategy,
        _timeout: Duration,
    ) -> Result<(), DriverError> {
        self.on_surface(
            surface,
            DriverCall::Navigate {
                url: url.to_string(),
                wait,
            },
        )?;
        lock(&self.state).navigation_results.pop_front().unwrap_or(Ok(()))
    }

    async fn set_document(&self, surface: &SurfaceId, html: &str) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::SetDocument(html.to_string()))
    }

    async fn reload(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::Reload)
    }

    async fn set_viewport(&self, surface: &SurfaceId, width: u32, height: u32) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::SetViewport(width, height))
    }

    async fn evaluate(&self, surface: &SurfaceId, expression: &str) -> Result<Value, DriverError> {
        self.on_surface(surface, DriverCall::Evaluate(expression.to_string()))?;
        Ok(lock(&self.state)
            .evaluation_results
            .pop_front()
            .unwrap_or(Value::Null))
    }

    async fn add_init_script(&self, surface: &SurfaceId, source: &str) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::AddInitScript(source.to_string()))
    }

    async fn screenshot(&self, surface: &SurfaceId, _quality: u8) -> Result<String, DriverError> {
        self.on_surface(surface, DriverCall::Screenshot)?;
        Ok(FAKE_JPEG.to_string())
    }

    async fn start_screencast(&self, surface: &SurfaceId, params: ScreencastParams) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::StartScreencast(params))?;
        match lock(&self.state).screencast_failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn ack_screencast_frame(&self, surface: &SurfaceId, session_id: i64) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::AckFrame(session_id))
    }

    async fn stop_screencast(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::StopScreencast(surface.clone()))
    }

    async fn dispatch_mouse(&self, surface: &SurfaceId, input: MouseInput) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::Mouse(input))
    }

    async fn dispatch_key(&self, surface: &SurfaceId, input: KeyInput) -> Result<(), DriverError> {
        let fails = input.action == KeyAction::Down;
        let key = input.key.key.clone();
        self.on_surface(surface, DriverCall::Key(input))?;
        let mut state = lock(&self.state);
        match state.key_down_failure.take() {
            Some((target, error)) if fails && target == key => Err(error),
            other => {
                state.key_down_failure = other;
                Ok(())
            }
        }
    }

    async fn insert_text(&self, surface: &SurfaceId, text: &str) -> Result<(), DriverError> {
        self.on_surface(surface, DriverCall::InsertText(text.to_string()))
    }
}

