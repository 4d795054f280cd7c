//! [`BrowserDriver`] over the Chrome DevTools Protocol.
//!
//! One browser-level connection carries everything.  Pages are discovered
//! with `Target.setDiscoverTargets` and attached with flattened sessions;
//! the target id doubles as the [`SurfaceId`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use signage_core::domain::input::Modifier;
use signage_core::domain::navigation::WaitStrategy;
use signage_core::protocol::messages::FrameMetadata;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::driver::{
    BrowserDriver, DriverError, DriverEvent, KeyAction, KeyInput, MouseAction, MouseInput,
    ScreencastParams, SurfaceId,
};
use crate::infrastructure::cdp::connection::{CdpConnection, CdpEvent};
use crate::infrastructure::cdp::process::{BrowserProcess, LaunchOptions};

const DRIVER_EVENT_CAPACITY: usize = 256;

/// Domains enabled on every attached page.
const PAGE_DOMAINS: &[&str] = &["Page.enable", "Runtime.enable", "Inspector.enable"];

// ── Page bookkeeping ──────────────────────────────────────────────────────────

/// Open pages and their sessions.
#[derive(Debug, Default)]
pub struct Pages {
    /// Page target ids, oldest first.
    targets: Vec<SurfaceId>,
    /// Target id to flattened session id.
    sessions: HashMap<SurfaceId, String>,
}

impl Pages {
    pub fn targets(&self) -> &[SurfaceId] {
        &self.targets
    }

    pub fn session(&self, surface: &SurfaceId) -> Option<&str> {
        self.sessions.get(surface).map(String::as_str)
    }

    fn surface_for_session(&self, session_id: &str) -> Option<SurfaceId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.as_str() == session_id)
            .map(|(target, _)| target.clone())
    }

    fn add(&mut self, target: &str) -> bool {
        if self.targets.iter().any(|t| t == target) {
            return false;
        }
        self.targets.push(target.to_string());
        true
    }

    /// Updates the bookkeeping for `event` and returns what the rest of the
    /// agent should hear about it.
    pub fn apply(&mut self, event: &CdpEvent) -> Option<DriverEvent> {
        let params = &event.params;
        let session_surface = event
            .session_id
            .as_deref()
            .and_then(|s| self.surface_for_session(s));

        match event.method.as_str() {
            "Target.targetCreated" => {
                let info = params.get("targetInfo")?;
                if info.get("type")?.as_str()? != "page" {
                    return None;
                }
                let target = info.get("targetId")?.as_str()?;
                self.add(target)
                    .then(|| DriverEvent::SurfaceCreated(target.to_string()))
            }
            "Target.targetDestroyed" => {
                let target = params.get("targetId")?.as_str()?;
                let known = self.targets.iter().any(|t| t == target);
                self.targets.retain(|t| t != target);
                self.sessions.remove(target);
                known.then(|| DriverEvent::SurfaceDestroyed(target.to_string()))
            }
            "Target.targetCrashed" => {
                let target = params.get("targetId")?.as_str()?;
                self.targets
                    .iter()
                    .any(|t| t == target)
                    .then(|| DriverEvent::SurfaceCrashed(target.to_string()))
            }
            "Target.detachedFromTarget" => {
                let session = params.get("sessionId")?.as_str()?;
                self.sessions.retain(|_, s| s != session);
                None
            }
            "Inspector.targetCrashed" => session_surface.map(DriverEvent::SurfaceCrashed),
            "Runtime.exceptionThrown" => {
                let surface = session_surface?;
                let details = params.get("exceptionDetails")?;
                let message = details
                    .pointer("/exception/description")
                    .and_then(Value::as_str)
                    .or_else(|| details.get("text").and_then(Value::as_str))
                    .unwrap_or("unknown page error")
                    .to_string();
                Some(DriverEvent::PageError { surface, message })
            }
            "Page.screencastFrame" => {
                let surface = session_surface?;
                let metadata = params
                    .get("metadata")
                    .cloned()
                    .and_then(|m| serde_json::from_value::<FrameMetadata>(m).ok())
                    .unwrap_or_default();
                Some(DriverEvent::ScreencastFrame {
                    surface,
                    session_id: params.get("sessionId")?.as_i64()?,
                    data: params.get("data")?.as_str()?.to_string(),
                    metadata,
                })
            }
            _ => None,
        }
    }
}

// ── Parameter builders ────────────────────────────────────────────────────────

pub fn mouse_params(input: &MouseInput) -> Value {
    let (kind, button) = match input.action {
        MouseAction::Move => ("mouseMoved", "none"),
        MouseAction::Press => ("mousePressed", input.button.protocol_name()),
        MouseAction::Release => ("mouseReleased", input.button.protocol_name()),
        MouseAction::Wheel => ("mouseWheel", "none"),
    };
    json!({
        "type": kind,
        "x": input.x,
        "y": input.y,
        "button": button,
        "clickCount": input.click_count,
        "deltaX": input.delta_x,
        "deltaY": input.delta_y,
    })
}

pub fn key_params(input: &KeyInput) -> Value {
    let chord = Modifier::Alt.bit() | Modifier::Ctrl.bit() | Modifier::Meta.bit();
    let text = input
        .key
        .text
        .as_deref()
        .filter(|_| input.action == KeyAction::Down && input.modifiers & chord == 0);
    let kind = match (input.action, text) {
        (KeyAction::Down, Some(_)) => "keyDown",
        (KeyAction::Down, None) => "rawKeyDown",
        (KeyAction::Up, _) => "keyUp",
    };
    let mut params = json!({
        "type": kind,
        "key": input.key.key,
        "code": input.key.code,
        "windowsVirtualKeyCode": input.key.key_code,
        "nativeVirtualKeyCode": input.key.key_code,
        "modifiers": input.modifiers,
    });
    if let Some(text) = text {
        params["text"] = Value::String(text.to_string());
    }
    params
}

fn is_gone_message(message: &str) -> bool {
    message.contains("No target with given id")
        || message.contains("Session with given id not found")
        || message.contains("No session with given id")
}

// ── Driver ────────────────────────────────────────────────────────────────────

pub struct CdpDriver {
    options: LaunchOptions,
    process: tokio::sync::Mutex<Option<BrowserProcess>>,
    conn: RwLock<Option<Arc<CdpConnection>>>,
    pages: Arc<Mutex<Pages>>,
    events: broadcast::Sender<DriverEvent>,
    stopping: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CdpDriver {
    pub fn new(options: LaunchOptions) -> Self {
        let (events, _) = broadcast::channel(DRIVER_EVENT_CAPACITY);
        Self {
            options,
            process: tokio::sync::Mutex::new(None),
            conn: RwLock::new(None),
            pages: Arc::new(Mutex::new(Pages::default())),
            events,
            stopping: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    fn connection(&self) -> Result<Arc<CdpConnection>, DriverError> {
        self.conn
            .read()
            .ok()
            .and_then(|c| (*c).clone())
            .filter(|c| !c.is_closed())
            .ok_or(DriverError::NotRunning)
    }

    fn session(&self, surface: &SurfaceId) -> Result<String, DriverError> {
        self.pages
            .lock()
            .ok()
            .and_then(|p| p.session(surface).map(str::to_string))
            .ok_or_else(|| DriverError::SurfaceGone(surface.clone()))
    }

    /// Sends `method` on the page's session.
    async fn page_call(
        &self,
        surface: &SurfaceId,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        let conn = self.connection()?;
        let session = self.session(surface)?;
        conn.call(method, params, Some(&session))
            .await
            .map_err(|e| match e {
                DriverError::Protocol { ref message, .. } if is_gone_message(message) => {
                    DriverError::SurfaceGone(surface.clone())
                }
                other => other,
            })
    }

    fn spawn_pump(&self, mut rx: broadcast::Receiver<CdpEvent>) -> JoinHandle<()> {
        let pages = self.pages.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("driver skipped {n} DevTools events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let translated = pages.lock().ok().and_then(|mut p| p.apply(&event));
                if let Some(translated) = translated {
                    let _ = events.send(translated);
                }
            }
        })
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn launch(&self) -> Result<(), DriverError> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }
        self.stopping.store(false, Ordering::SeqCst);
        let browser = BrowserProcess::launch(&self.options).await?;

        let events = self.events.clone();
        let stopping = self.stopping.clone();
        let conn = CdpConnection::connect(browser.ws_url(), move || {
            if !stopping.load(Ordering::SeqCst) {
                let _ = events.send(DriverEvent::BrowserExited);
            }
        })
        .await?;

        let pump = self.spawn_pump(conn.subscribe());
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(old) = slot.replace(pump) {
                old.abort();
            }
        }

        conn.call("Target.setDiscoverTargets", json!({ "discover": true }), None)
            .await?;
        let targets = conn.call("Target.getTargets", json!({}), None).await?;
        if let (Some(infos), Ok(mut pages)) = (
            targets.get("targetInfos").and_then(Value::as_array),
            self.pages.lock(),
        ) {
            for info in infos {
                if info.get("type").and_then(Value::as_str) == Some("page") {
                    if let Some(id) = info.get("targetId").and_then(Value::as_str) {
                        pages.add(id);
                    }
                }
            }
        }

        if let Ok(mut slot) = self.conn.write() {
            *slot = Some(conn);
        }
        *process = Some(browser);
        info!("browser ready");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        self.stopping.store(true, Ordering::SeqCst);
        let conn = self.conn.write().ok().and_then(|mut c| c.take());
        if let Some(conn) = conn {
            if let Err(e) = conn.call("Browser.close", json!({}), None).await {
                debug!("Browser.close failed: {e}");
            }
        }
        if let Some(pump) = self.pump.lock().ok().and_then(|mut p| p.take()) {
            pump.abort();
        }
        if let Ok(mut pages) = self.pages.lock() {
            *pages = Pages::default();
        }
        if let Some(process) = self.process.lock().await.take() {
            process.kill().await;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    async fn surfaces(&self) -> Result<Vec<SurfaceId>, DriverError> {
        self.connection()?;
        Ok(self
            .pages
            .lock()
            .map(|p| p.targets().to_vec())
            .unwrap_or_default())
    }

    async fn attach(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        if self.session(surface).is_ok() {
            return Ok(());
        }
        let conn = self.connection()?;
        let reply = conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": surface, "flatten": true }),
                None,
            )
            .await
            .map_err(|e| match e {
                DriverError::Protocol { ref message, .. } if is_gone_message(message) => {
                    DriverError::SurfaceGone(surface.clone())
                }
                other => other,
            })?;
        let session = reply
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol {
                code: None,
                message: "attachToTarget returned no sessionId".into(),
            })?
            .to_string();
        if let Ok(mut pages) = self.pages.lock() {
            pages.sessions.insert(surface.clone(), session);
        }
        for method in PAGE_DOMAINS {
            self.page_call(surface, method, json!({})).await?;
        }
        debug!("attached to {surface}");
        Ok(())
    }

    async fn is_alive(&self, surface: &SurfaceId) -> bool {
        self.connection().is_ok()
            && self
                .pages
                .lock()
                .map(|p| p.targets().contains(surface))
                .unwrap_or(false)
    }

    async fn navigate(
        &self,
        surface: &SurfaceId,
        url: &str,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let conn = self.connection()?;
        let session = self.session(surface)?;
        let mut events = conn.subscribe();

        let reply = self
            .page_call(surface, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error) = reply
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
        {
            return Err(DriverError::Navigation(error.to_string()));
        }
        if reply.get("loaderId").is_none() {
            // Same-document navigation: no load event follows.
            return Ok(());
        }

        let wanted = match wait {
            WaitStrategy::Load => "Page.loadEventFired",
            WaitStrategy::DomContentLoaded => "Page.domContentEventFired",
        };
        let waited = tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(event)
                        if event.method == wanted
                            && event.session_id.as_deref() == Some(session.as_str()) =>
                    {
                        return Ok(());
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(DriverError::Connection("browser connection closed".into()))
                    }
                }
            }
        })
        .await;
        waited.map_err(|_| DriverError::Timeout(timeout))?
    }

    async fn set_document(&self, surface: &SurfaceId, html: &str) -> Result<(), DriverError> {
        let tree = self.page_call(surface, "Page.getFrameTree", json!({})).await?;
        let frame_id = tree
            .pointer("/frameTree/frame/id")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol {
                code: None,
                message: "frame tree has no root frame".into(),
            })?
            .to_string();
        self.page_call(
            surface,
            "Page.setDocumentContent",
            json!({ "frameId": frame_id, "html": html }),
        )
        .await
        .map(|_| ())
    }

    async fn reload(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.page_call(surface, "Page.reload", json!({})).await.map(|_| ())
    }

    async fn set_viewport(&self, surface: &SurfaceId, width: u32, height: u32) -> Result<(), DriverError> {
        self.page_call(
            surface,
            "Emulation.setDeviceMetricsOverride",
            json!({ "width": width, "height": height, "deviceScaleFactor": 1, "mobile": false }),
        )
        .await
        .map(|_| ())
    }

    async fn evaluate(&self, surface: &SurfaceId, expression: &str) -> Result<Value, DriverError> {
        let reply = self
            .page_call(
                surface,
                "Runtime.evaluate",
                json!({ "expression": expression, "awaitPromise": true, "returnByValue": true }),
            )
            .await?;
        if let Some(details) = reply.get("exceptionDetails") {
            let message = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script threw");
            return Err(DriverError::Evaluation(message.to_string()));
        }
        Ok(reply.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    async fn add_init_script(&self, surface: &SurfaceId, source: &str) -> Result<(), DriverError> {
        self.page_call(
            surface,
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await
        .map(|_| ())
    }

    async fn screenshot(&self, surface: &SurfaceId, quality: u8) -> Result<String, DriverError> {
        let reply = self
            .page_call(
                surface,
                "Page.captureScreenshot",
                json!({ "format": "jpeg", "quality": quality }),
            )
            .await?;
        reply
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DriverError::Protocol {
                code: None,
                message: "captureScreenshot returned no data".into(),
            })
    }

    async fn start_screencast(&self, surface: &SurfaceId, params: ScreencastParams) -> Result<(), DriverError> {
        self.page_call(
            surface,
            "Page.startScreencast",
            json!({
                "format": "jpeg",
                "quality": params.quality,
                "maxWidth": params.max_width,
                "maxHeight": params.max_height,
                "everyNthFrame": 1,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn ack_screencast_frame(&self, surface: &SurfaceId, session_id: i64) -> Result<(), DriverError> {
        self.page_call(
            surface,
            "Page.screencastFrameAck",
            json!({ "sessionId": session_id }),
        )
        .await
        .map(|_| ())
    }

    async fn stop_screencast(&self, surface: &SurfaceId) -> Result<(), DriverError> {
        self.page_call(surface, "Page.stopScreencast", json!({}))
            .await
            .map(|_| ())
    }

    async fn dispatch_mouse(&self, surface: &SurfaceId, input: MouseInput) -> Result<(), DriverError> {
        self.page_call(surface, "Input.dispatchMouseEvent", mouse_params(&input))
            .await
            .map(|_| ())
    }

    async fn dispatch_key(&self, surface: &SurfaceId, input: KeyInput) -> Result<(), DriverError> {
        self.page_call(surface, "Input.dispatchKeyEvent", key_params(&input))
            .await
            .map(|_| ())
    }

    async fn insert_text(&self, surface: &SurfaceId, text: &str) -> Result<(), DriverError> {
        self.page_call(surface, "Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
