//! The browser capability port.
//!
//! Everything the agent needs from a browser is expressed by
//! [`BrowserDriver`].  The scheduler and protocol layers never see
//! driver-specific types; the render, stream, and input controllers only see
//! this trait.  The shipped implementation speaks the Chrome DevTools Protocol
//! (`infrastructure::cdp`); tests use the recording fake in
//! `infrastructure::mock`.
//!
//! # Surfaces (for beginners)
//!
//! A *surface* is one browser page (tab or popup window).  The agent shows
//! content on exactly one *active* surface, but a page may open extra windows
//! (for example an OAuth login popup), so the driver reports every surface it
//! sees and the render controller decides which one is active.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use signage_core::domain::input::{KeyDescriptor, MouseButton};
use signage_core::domain::navigation::WaitStrategy;
use signage_core::protocol::messages::FrameMetadata;
use thiserror::Error;
use tokio::sync::broadcast;

/// Opaque identifier of one browser page.
pub type SurfaceId = String;

/// Errors raised by a browser driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The browser process could not be started.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// No browser is running.
    #[error("browser is not running")]
    NotRunning,

    /// The surface is closed or was never attached.
    #[error("surface {0} is not available")]
    SurfaceGone(SurfaceId),

    /// The browser rejected a request.
    #[error("protocol error: {message}")]
    Protocol { code: Option<i64>, message: String },

    /// The page refused to load (`net::ERR_ABORTED`, DNS failures, …).
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A wait did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Script evaluation threw.
    #[error("script error: {0}")]
    Evaluation(String),

    /// The connection to the browser broke.
    #[error("browser connection error: {0}")]
    Connection(String),

    #[error("browser I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Returns `true` for an aborted navigation (usually a service worker
    /// intercepting the request).
    pub fn is_aborted(&self) -> bool {
        matches!(self, DriverError::Navigation(text) if text.contains("ERR_ABORTED"))
    }
}

/// Asynchronous notifications from the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    SurfaceCreated(SurfaceId),
    SurfaceDestroyed(SurfaceId),
    /// The page's renderer process died.
    SurfaceCrashed(SurfaceId),
    /// An uncaught script error on a page.
    PageError { surface: SurfaceId, message: String },
    /// One screencast frame; must be acknowledged with `session_id`.
    ScreencastFrame {
        surface: SurfaceId,
        session_id: i64,
        data: String,
        metadata: FrameMetadata,
    },
    /// The whole browser process went away.
    BrowserExited,
}

/// Screencast request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreencastParams {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 0–100.
    pub quality: u8,
}

impl Default for ScreencastParams {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 720,
            quality: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Move,
    Press,
    Release,
    Wheel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseInput {
    pub action: MouseAction,
    pub x: f64,
    pub y: f64,
    pub button: MouseButton,
    pub click_count: u32,
    pub delta_x: f64,
    pub delta_y: f64,
}

impl MouseInput {
    pub fn new(action: MouseAction, x: f64, y: f64, button: MouseButton) -> Self {
        let click_count = u32::from(matches!(action, MouseAction::Press | MouseAction::Release));
        Self {
            action,
            x,
            y,
            button,
            click_count,
            delta_x: 0.0,
            delta_y: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub action: KeyAction,
    pub key: KeyDescriptor,
    /// DevTools modifier bit mask (Alt=1, Ctrl=2, Meta=4, Shift=8).
    pub modifiers: u8,
}

/// Capability interface over a remote-debuggable browser.
///
/// Every call that takes a [`SurfaceId`] fails with
/// [`DriverError::SurfaceGone`] when the surface has closed; callers treat
/// that as a no-op.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Starts the browser.
    async fn launch(&self) -> Result<(), DriverError>;

    /// Stops the browser; best effort.
    async fn shutdown(&self) -> Result<(), DriverError>;

    /// Subscribes to [`DriverEvent`]s.
    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;

    /// Lists open pages, oldest first.
    async fn surfaces(&self) -> Result<Vec<SurfaceId>, DriverError>;

    /// Attaches to a page so it can be driven.
    async fn attach(&self, surface: &SurfaceId) -> Result<(), DriverError>;

    /// Returns `true` while the page is open and attached.
    async fn is_alive(&self, surface: &SurfaceId) -> bool;

    /// Navigates and waits per `wait` for at most `timeout`.
    async fn navigate(
        &self,
        surface: &SurfaceId,
        url: &str,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Replaces the current document with `html`.
    async fn set_document(&self, surface: &SurfaceId, html: &str) -> Result<(), DriverError>;

    async fn reload(&self, surface: &SurfaceId) -> Result<(), DriverError>;

    async fn set_viewport(&self, surface: &SurfaceId, width: u32, height: u32) -> Result<(), DriverError>;

    /// Evaluates a script expression and returns its JSON value.
    async fn evaluate(&self, surface: &SurfaceId, expression: &str) -> Result<Value, DriverError>;

    /// Registers a script that runs in every new document on the page.
    async fn add_init_script(&self, surface: &SurfaceId, source: &str) -> Result<(), DriverError>;

    /// Captures one JPEG frame, base64-encoded.
    async fn screenshot(&self, surface: &SurfaceId, quality: u8) -> Result<String, DriverError>;

    async fn start_screencast(&self, surface: &SurfaceId, params: ScreencastParams) -> Result<(), DriverError>;

    async fn ack_screencast_frame(&self, surface: &SurfaceId, session_id: i64) -> Result<(), DriverError>;

    async fn stop_screencast(&self, surface: &SurfaceId) -> Result<(), DriverError>;

    async fn dispatch_mouse(&self, surface: &SurfaceId, input: MouseInput) -> Result<(), DriverError>;

    async fn dispatch_key(&self, surface: &SurfaceId, input: KeyInput) -> Result<(), DriverError>;

    /// Types `text` into the focused element as a single edit.
    async fn insert_text(&self, surface: &SurfaceId, text: &str) -> Result<(), DriverError>;
}
