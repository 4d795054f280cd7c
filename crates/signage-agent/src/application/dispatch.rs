//! Inbound event dispatch.
//!
//! # Handler registry (for beginners)
//!
//! Every inbound event kind has at most one handler.  Registering a handler
//! for a kind that already has one *replaces* it and [`HandlerRegistry::on`]
//! returns `true` so the caller can notice an accidental overwrite.
//!
//! Handlers are plain synchronous closures.  Work that has to await (a
//! navigation, a remote click, a screenshot) is pushed onto a [`TaskLane`],
//! a queue drained by a single task, so two remote key presses can never
//! overtake each other even though the handler returned immediately.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use signage_core::protocol::messages::{ErrorKind, ErrorReport, ScreencastStart};
use signage_core::{EventKind, InboundEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::content_cache::ContentCache;
use crate::application::driver::ScreencastParams;
use crate::application::input::{InputError, RemoteInput};
use crate::application::render::RenderController;
use crate::application::scheduler::{SchedulerError, SchedulerHandle};
use crate::application::screenshots::ScreenshotService;
use crate::application::settings::RuntimeSettings;
use crate::application::stream::StreamController;
use crate::application::telemetry::Telemetry;

type Handler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Why the agent is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl-C or SIGTERM.
    Signal,
    /// The server sent `device-restart`.
    RestartRequested,
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventKind, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` for `kind`.  Returns `true` if it replaced one.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> bool
    where
        F: Fn(InboundEvent) + Send + Sync + 'static,
    {
        let replaced = match self.handlers.write() {
            Ok(mut handlers) => handlers.insert(kind, Arc::new(handler)).is_some(),
            Err(poisoned) => poisoned
                .into_inner()
                .insert(kind, Arc::new(handler))
                .is_some(),
        };
        if replaced {
            debug!("handler for {kind} replaced");
        }
        replaced
    }

    /// Runs the handler for `event`.  Returns `false` if none is registered.
    pub fn dispatch(&self, event: InboundEvent) -> bool {
        let kind = event.kind();
        let handler = self
            .handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(&kind).cloned());
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => {
                debug!("no handler for {kind}");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Task lanes ────────────────────────────────────────────────────────────────

/// A FIFO of futures run one after another on a dedicated task.
#[derive(Clone)]
pub struct TaskLane {
    name: &'static str,
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl TaskLane {
    pub fn spawn(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!("{name} lane closed");
        });
        Self { name, tx }
    }

    pub fn push<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(Box::pin(job)).is_err() {
            warn!("{} lane is closed; job dropped", self.name);
        }
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Everything the inbound handlers act on.
pub struct AgentComponents {
    pub scheduler: SchedulerHandle,
    pub render: Arc<RenderController>,
    pub stream: Arc<StreamController>,
    pub input: Arc<RemoteInput>,
    pub screenshots: Arc<ScreenshotService>,
    pub settings: Arc<RuntimeSettings>,
    pub cache: Arc<dyn ContentCache>,
    pub telemetry: Arc<dyn Telemetry>,
    pub shutdown: mpsc::UnboundedSender<ShutdownReason>,
}

/// Registers a handler for every inbound event kind.
pub fn wire_handlers(registry: &HandlerRegistry, components: Arc<AgentComponents>) {
    let control = TaskLane::spawn("control");
    let input = TaskLane::spawn("input");

    // ── Playlist ──────────────────────────────────────────────────────────────
    {
        let c = components.clone();
        let lane = control.clone();
        registry.on(EventKind::ContentUpdate, move |event| {
            let InboundEvent::ContentUpdate(update) = event else { return };
            info!(
                "content update: playlist {:?}, {} item(s)",
                update.playlist_id,
                update.items.len()
            );
            let items = update.items;
            log_closed(c.scheduler.load_playlist(items.clone(), update.playlist_id));
            let cache = c.cache.clone();
            lane.push(async move { cache.sync_playlist(&items).await });
        });
    }
    {
        let c = components.clone();
        registry.on(EventKind::Navigate, move |event| {
            let InboundEvent::Navigate(cmd) = event else { return };
            let duration = cmd.duration.filter(|ms| *ms > 0).map(Duration::from_millis);
            log_closed(c.scheduler.navigate(cmd.url, duration));
        });
    }
    {
        let c = components.clone();
        registry.on(EventKind::PlaylistPause, move |_| log_closed(c.scheduler.pause()));
    }
    {
        let c = components.clone();
        registry.on(EventKind::PlaylistResume, move |_| log_closed(c.scheduler.resume()));
    }
    {
        let c = components.clone();
        registry.on(EventKind::PlaylistNext, move |event| {
            let InboundEvent::PlaylistNext(step) = event else { return };
            log_closed(c.scheduler.next(step.respect_constraints));
        });
    }
    {
        let c = components.clone();
        registry.on(EventKind::PlaylistPrevious, move |event| {
            let InboundEvent::PlaylistPrevious(step) = event else { return };
            log_closed(c.scheduler.previous(step.respect_constraints));
        });
    }
    {
        let c = components.clone();
        registry.on(EventKind::BroadcastStart, move |event| {
            let InboundEvent::BroadcastStart(start) = event else { return };
            log_closed(c.scheduler.start_broadcast(start.into_override()));
        });
    }
    {
        let c = components.clone();
        registry.on(EventKind::BroadcastEnd, move |_| log_closed(c.scheduler.end_broadcast()));
    }

    // ── Device ────────────────────────────────────────────────────────────────
    {
        let c = components.clone();
        let lane = control.clone();
        registry.on(EventKind::ScreenshotRequest, move |_| {
            let screenshots = c.screenshots.clone();
            lane.push(async move { screenshots.capture_now(false).await });
        });
    }
    {
        let c = components.clone();
        let lane = control.clone();
        registry.on(EventKind::ConfigUpdate, move |event| {
            let InboundEvent::ConfigUpdate(update) = event else { return };
            let settings = c.settings.clone();
            lane.push(async move { settings.apply(&update).await });
        });
    }
    {
        let c = components.clone();
        registry.on(EventKind::DeviceRestart, move |_| {
            info!("server requested a restart");
            if c.shutdown.send(ShutdownReason::RestartRequested).is_err() {
                warn!("shutdown already in progress");
            }
        });
    }
    {
        let c = components.clone();
        let lane = control.clone();
        registry.on(EventKind::DisplayRefresh, move |_| {
            let render = c.render.clone();
            lane.push(async move { render.reload().await });
        });
    }

    // ── Live view ─────────────────────────────────────────────────────────────
    {
        let c = components.clone();
        registry.on(EventKind::StreamStart, move |event| {
            let InboundEvent::StreamStart(start) = event else { return };
            c.screenshots.start_preview(start.interval_ms);
        });
    }
    {
        let c = components.clone();
        registry.on(EventKind::StreamStop, move |_| c.screenshots.stop_preview());
    }
    {
        let c = components.clone();
        let lane = control.clone();
        registry.on(EventKind::ScreencastStart, move |event| {
            let InboundEvent::ScreencastStart(start) = event else { return };
            let stream = c.stream.clone();
            lane.push(async move {
                if let Err(e) = stream.start(screencast_params(&start)).await {
                    warn!("screencast did not start: {e}");
                }
            });
        });
    }
    {
        let c = components.clone();
        let lane = control.clone();
        registry.on(EventKind::ScreencastStop, move |_| {
            let stream = c.stream.clone();
            lane.push(async move { stream.stop().await });
        });
    }

    // ── Remote input ──────────────────────────────────────────────────────────
    {
        let c = components.clone();
        let lane = input.clone();
        registry.on(EventKind::RemoteClick, move |event| {
            let InboundEvent::RemoteClick(click) = event else { return };
            let (remote, telemetry) = (c.input.clone(), c.telemetry.clone());
            lane.push(async move { report_input(telemetry.as_ref(), remote.click(&click).await) });
        });
    }
    {
        let c = components.clone();
        let lane = input.clone();
        registry.on(EventKind::RemoteType, move |event| {
            let InboundEvent::RemoteType(request) = event else { return };
            let (remote, telemetry) = (c.input.clone(), c.telemetry.clone());
            lane.push(async move {
                report_input(telemetry.as_ref(), remote.type_text(&request).await)
            });
        });
    }
    {
        let c = components.clone();
        let lane = input.clone();
        registry.on(EventKind::RemoteKey, move |event| {
            let InboundEvent::RemoteKey(request) = event else { return };
            let (remote, telemetry) = (c.input.clone(), c.telemetry.clone());
            lane.push(async move { report_input(telemetry.as_ref(), remote.key(&request).await) });
        });
    }
    {
        let c = components;
        let lane = input;
        registry.on(EventKind::RemoteScroll, move |event| {
            let InboundEvent::RemoteScroll(request) = event else { return };
            let (remote, telemetry) = (c.input.clone(), c.telemetry.clone());
            lane.push(async move {
                report_input(telemetry.as_ref(), remote.scroll(&request).await)
            });
        });
    }
}

fn screencast_params(start: &ScreencastStart) -> ScreencastParams {
    let defaults = ScreencastParams::default();
    ScreencastParams {
        max_width: start.max_width.filter(|w| *w > 0).unwrap_or(defaults.max_width),
        max_height: start.max_height.filter(|h| *h > 0).unwrap_or(defaults.max_height),
        quality: start.quality.map_or(defaults.quality, |q| q.min(100)),
    }
}

fn report_input(telemetry: &dyn Telemetry, result: Result<(), InputError>) {
    if let Err(e) = result {
        warn!("remote input failed: {e}");
        telemetry.report(ErrorReport::new(ErrorKind::RemoteInput, e.to_string()));
    }
}

fn log_closed(result: Result<(), SchedulerError>) {
    if let Err(e) = result {
        warn!("scheduler command dropped: {e}");
    }
}
