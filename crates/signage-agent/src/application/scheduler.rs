//! ContentScheduler: decides what is on screen and for how long.
//!
//! # How it runs (for beginners)
//!
//! The scheduler is an *actor*: one task owns all playlist state and handles
//! [`SchedulerCommand`]s one at a time from an unbounded channel.  Other
//! components hold a cheap, cloneable [`SchedulerHandle`] and never touch the
//! state directly, so there are no locks around it.
//!
//! Timers are tasks that sleep and then send a command back into the same
//! channel.  Every timer carries the *generation* of the slot that armed it;
//! cancelling or re-arming a slot bumps the generation, so a tick that was
//! already in flight when the timer was cancelled is recognised as stale and
//! ignored.  Together with aborting the sleeping task this keeps at most one
//! pending rotation timer alive at any instant.
//!
//! # States
//!
//! ```text
//!   Stopped ──start──▶ Running ◀──resume── Paused
//!      ▲                  │   ──pause───▶    │
//!      └──────stop────────┴──────────────────┘
//! ```
//!
//! `broadcasting` is orthogonal: a broadcast preempts the display while
//! Running or Paused and is undone by `end_broadcast`, which restores the
//! exact pre-broadcast playlist and cursor.

use std::sync::Arc;
use std::time::Duration;

use signage_core::domain::rotation::{plan_reload, rotation_delay, ReloadPlan, NO_VALID_ITEM_RETRY};
use signage_core::protocol::messages::OutboundEvent;
use signage_core::{
    BroadcastOverride, Clock, DisplayTarget, PlaybackStateSnapshot, PlaylistItem, Rotation,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::screenshots::{CaptureCadence, CapturePolicy};
use crate::application::telemetry::Telemetry;

/// Interval of the playback-state heartbeat while running.
pub const SNAPSHOT_HEARTBEAT: Duration = Duration::from_secs(5);

/// Pause between ending a broadcast and resuming rotation, so the next
/// navigation does not race the teardown of the broadcast page.
pub const BROADCAST_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler task has exited.
    #[error("scheduler task has stopped")]
    Closed,
}

/// Where the scheduler sends what it decided to show.
pub trait ContentDisplay: Send + Sync {
    fn show(&self, target: DisplayTarget);
}

/// Messages handled by the scheduler task.
#[derive(Debug)]
pub enum SchedulerCommand {
    LoadPlaylist {
        items: Vec<PlaylistItem>,
        playlist_id: Option<String>,
    },
    Start,
    Stop,
    Pause,
    Resume,
    Next { respect_constraints: bool },
    Previous { respect_constraints: bool },
    StartBroadcast(BroadcastOverride),
    EndBroadcast,
    /// Show `url` outside the playlist; rotation resumes after `duration`.
    Navigate {
        url: String,
        duration: Option<Duration>,
    },
    Snapshot(oneshot::Sender<PlaybackStateSnapshot>),
    Shutdown,

    // Timer events.
    RotationDue { generation: u64 },
    BroadcastSettled { generation: u64 },
    BroadcastExpired { generation: u64 },
    Heartbeat,
}

/// Collaborators injected into the scheduler.
pub struct SchedulerDeps {
    pub display: Arc<dyn ContentDisplay>,
    pub telemetry: Arc<dyn Telemetry>,
    pub cadence: Arc<dyn CaptureCadence>,
    pub clock: Arc<dyn Clock>,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable front door to the scheduler task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    fn send(&self, cmd: SchedulerCommand) -> Result<(), SchedulerError> {
        self.tx.send(cmd).map_err(|_| SchedulerError::Closed)
    }

    /// Replaces the playlist.  Starts the scheduler if it was stopped and the
    /// playlist is non-empty; stops it if the playlist is empty.
    pub fn load_playlist(
        &self,
        items: Vec<PlaylistItem>,
        playlist_id: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::LoadPlaylist { items, playlist_id })
    }

    pub fn start(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Start)
    }

    pub fn stop(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Stop)
    }

    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Resume)
    }

    pub fn next(&self, respect_constraints: bool) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Next { respect_constraints })
    }

    pub fn previous(&self, respect_constraints: bool) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Previous { respect_constraints })
    }

    pub fn start_broadcast(&self, broadcast: BroadcastOverride) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::StartBroadcast(broadcast))
    }

    pub fn end_broadcast(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::EndBroadcast)
    }

    pub fn navigate(&self, url: String, duration: Option<Duration>) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Navigate { url, duration })
    }

    /// Asks the scheduler task to exit after cancelling its timers.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Shutdown)
    }

    /// Returns the current playback state.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] if the scheduler task has exited.
    pub async fn snapshot(&self) -> Result<PlaybackStateSnapshot, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Snapshot(reply))?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }
}

// ── Timer slot ────────────────────────────────────────────────────────────────

/// One cancellable timer.  Arming replaces whatever was pending.
#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn arm(
        &mut self,
        tx: &mpsc::UnboundedSender<SchedulerCommand>,
        delay: Duration,
        make: impl FnOnce(u64) -> SchedulerCommand,
    ) {
        self.cancel();
        let cmd = make(self.generation);
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(cmd);
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Consumes a fired tick; returns `false` for stale ticks.
    fn take_fired(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && self.generation == generation {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

// ── Scheduler state ───────────────────────────────────────────────────────────

/// Pre-broadcast position; the sole source of truth for restoration.
#[derive(Debug, Clone)]
struct SavedPosition {
    rotation: Rotation,
    playlist_id: Option<String>,
    current: Option<usize>,
    current_url: Option<String>,
}

#[derive(Debug)]
struct ActiveBroadcast {
    content: BroadcastOverride,
    saved: SavedPosition,
}

pub struct ContentScheduler {
    rotation: Rotation,
    playlist_id: Option<String>,
    running: bool,
    paused: bool,
    /// Index of the item on screen, if the screen shows a playlist item.
    current: Option<usize>,
    current_url: Option<String>,
    item_started_at: Option<Instant>,
    current_delay: Option<Duration>,
    /// Remaining display time captured by `pause`.
    remaining: Option<Duration>,
    broadcast: Option<ActiveBroadcast>,

    rotation_timer: TimerSlot,
    broadcast_timer: TimerSlot,
    /// Redisplay after a broadcast ends; kept apart so rotation re-arms
    /// cannot swallow it.
    settle_timer: TimerSlot,
    heartbeat: Option<JoinHandle<()>>,

    deps: SchedulerDeps,
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl ContentScheduler {
    /// Spawns the scheduler task and returns its handle.
    pub fn spawn(deps: SchedulerDeps) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            rotation: Rotation::default(),
            playlist_id: None,
            running: false,
            paused: false,
            current: None,
            current_url: None,
            item_started_at: None,
            current_delay: None,
            remaining: None,
            broadcast: None,
            rotation_timer: TimerSlot::default(),
            broadcast_timer: TimerSlot::default(),
            settle_timer: TimerSlot::default(),
            heartbeat: None,
            deps,
            tx: tx.clone(),
        };
        let task = tokio::spawn(scheduler.run(rx));
        (SchedulerHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SchedulerCommand>) {
        while let Some(cmd) = rx.recv().await {
            if !self.handle(cmd) {
                break;
            }
        }
        self.cancel_all_timers();
        debug!("scheduler task exited");
    }

    /// Applies one command.  Returns `false` when the task should exit.
    fn handle(&mut self, cmd: SchedulerCommand) -> bool {
        match cmd {
            SchedulerCommand::LoadPlaylist { items, playlist_id } => {
                self.load_playlist(items, playlist_id)
            }
            SchedulerCommand::Start => self.start(),
            SchedulerCommand::Stop => self.stop(),
            SchedulerCommand::Pause => self.pause(),
            SchedulerCommand::Resume => self.resume(),
            SchedulerCommand::Next { respect_constraints } => self.step(true, respect_constraints),
            SchedulerCommand::Previous { respect_constraints } => {
                self.step(false, respect_constraints)
            }
            SchedulerCommand::StartBroadcast(content) => self.start_broadcast(content),
            SchedulerCommand::EndBroadcast => self.end_broadcast(),
            SchedulerCommand::Navigate { url, duration } => self.navigate(url, duration),
            SchedulerCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SchedulerCommand::Shutdown => return false,
            SchedulerCommand::RotationDue { generation } => {
                if self.rotation_timer.take_fired(generation) {
                    self.on_rotation_due();
                } else {
                    debug!("ignoring stale rotation tick {generation}");
                }
            }
            SchedulerCommand::BroadcastSettled { generation } => {
                if self.settle_timer.take_fired(generation) {
                    self.on_broadcast_settled();
                }
            }
            SchedulerCommand::BroadcastExpired { generation } => {
                if self.broadcast_timer.take_fired(generation) {
                    info!("broadcast duration elapsed");
                    self.end_broadcast();
                }
            }
            SchedulerCommand::Heartbeat => {
                if self.running {
                    self.emit_snapshot();
                }
            }
        }
        true
    }

    // ── Operations ────────────────────────────────────────────────────────────

    fn load_playlist(&mut self, items: Vec<PlaylistItem>, playlist_id: Option<String>) {
        info!("loading playlist {:?} with {} item(s)", playlist_id, items.len());

        if let Some(active) = self.broadcast.as_mut() {
            // Restoration happens from the saved position, so the new
            // playlist replaces it and takes effect when the broadcast ends.
            active.saved = SavedPosition {
                rotation: Rotation::new(items),
                playlist_id,
                current: None,
                current_url: None,
            };
            self.rotation = active.saved.rotation.clone();
            self.playlist_id = active.saved.playlist_id.clone();
            self.current = None;
            self.emit_snapshot();
            return;
        }

        if items.is_empty() {
            self.rotation = Rotation::default();
            self.playlist_id = playlist_id;
            self.stop();
            self.current = None;
            self.current_url = None;
            self.deps.display.show(DisplayTarget::Blank);
            self.emit_snapshot();
            return;
        }

        if !self.running {
            self.rotation = Rotation::new(items);
            self.playlist_id = playlist_id;
            self.start();
            return;
        }

        let displayed_id = self
            .current
            .and_then(|idx| self.rotation.get(idx))
            .map(|item| item.id.clone());
        let plan = plan_reload(self.rotation.items(), &items, displayed_id.as_deref());
        self.rotation = Rotation::new(items);
        self.playlist_id = playlist_id;

        match plan {
            ReloadPlan::Restart(reason) => {
                info!("playlist changed ({reason:?}); restarting rotation");
                self.rotation_timer.cancel();
                self.settle_timer.cancel();
                self.paused = false;
                self.remaining = None;
                self.current = None;
                self.play_next(false);
            }
            ReloadPlan::Continue { cursor } => {
                debug!("playlist update keeps the current item; continuing");
                self.rotation.set_cursor(cursor);
                let len = self.rotation.len();
                self.current = Some((cursor + len - 1) % len);
                self.deps.cadence.set_policy(self.capture_policy());
                self.emit_snapshot();
            }
        }
    }

    fn start(&mut self) {
        if self.rotation.is_empty() {
            warn!("cannot start the scheduler with an empty playlist");
            return;
        }
        if self.running {
            debug!("scheduler already running");
            return;
        }
        info!("scheduler starting with {} item(s)", self.rotation.len());
        self.running = true;
        self.paused = false;
        self.remaining = None;
        self.start_heartbeat();
        self.rotation.set_cursor(0);
        self.play_next(false);
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("scheduler stopping");
        self.rotation_timer.cancel();
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        self.running = false;
        self.paused = false;
        self.remaining = None;
        self.emit_snapshot();
    }

    fn pause(&mut self) {
        if !self.running || self.paused {
            debug!("pause ignored (running={}, paused={})", self.running, self.paused);
            return;
        }
        self.paused = true;
        if self.broadcast.is_none() {
            self.remaining = self.elapsed_remaining();
            self.rotation_timer.cancel();
            info!("paused with {:?} remaining", self.remaining);
        }
        self.emit_snapshot();
    }

    fn resume(&mut self) {
        if !self.paused {
            debug!("resume ignored (not paused)");
            return;
        }
        self.paused = false;
        if self.broadcast.is_some() {
            self.emit_snapshot();
            return;
        }
        match self.remaining.take() {
            Some(left) if !left.is_zero() => {
                info!("resuming with {left:?} remaining");
                self.current_delay = Some(left);
                self.item_started_at = Some(Instant::now());
                self.arm_rotation(left);
                self.emit_snapshot();
            }
            Some(_) => self.play_next(false),
            None if self.current.is_none() => self.play_next(false),
            None => self.emit_snapshot(),
        }
    }

    fn step(&mut self, forward: bool, respect_constraints: bool) {
        if self.broadcast.is_some() {
            debug!("manual step ignored during broadcast");
            return;
        }
        if !self.running || self.rotation.is_empty() {
            debug!("manual step ignored (scheduler not running)");
            return;
        }
        self.rotation_timer.cancel();
        self.settle_timer.cancel();
        self.paused = false;
        self.remaining = None;
        let now = self.deps.clock.now();
        let picked = match (forward, respect_constraints) {
            (true, true) => self.rotation.select_next(now),
            (false, true) => self.rotation.select_previous(now),
            (true, false) => self.rotation.step_forward(),
            (false, false) => self.rotation.step_backward(),
        };
        match picked {
            Some(idx) => self.display_item(idx),
            None => self.no_valid_item(),
        }
    }

    fn start_broadcast(&mut self, content: BroadcastOverride) {
        info!("starting {:?} broadcast", content.kind);
        self.rotation_timer.cancel();
        self.settle_timer.cancel();
        let saved = match self.broadcast.take() {
            Some(previous) => previous.saved,
            None => SavedPosition {
                rotation: self.rotation.clone(),
                playlist_id: self.playlist_id.clone(),
                current: self.current,
                current_url: self.current_url.clone(),
            },
        };
        if !self.paused {
            self.remaining = None;
        }
        match content.auto_end_after() {
            Some(after) => self.broadcast_timer.arm(&self.tx, after, |generation| {
                SchedulerCommand::BroadcastExpired { generation }
            }),
            None => self.broadcast_timer.cancel(),
        }
        self.deps.display.show(DisplayTarget::Broadcast(content.clone()));
        self.broadcast = Some(ActiveBroadcast { content, saved });
        self.emit_snapshot();
    }

    fn end_broadcast(&mut self) {
        let Some(active) = self.broadcast.take() else {
            debug!("end_broadcast ignored (no broadcast active)");
            return;
        };
        info!("ending {:?} broadcast", active.content.kind);
        self.broadcast_timer.cancel();
        let saved = active.saved;
        self.rotation = saved.rotation;
        self.playlist_id = saved.playlist_id;
        self.current = saved.current;
        self.current_url = saved.current_url;
        let tx = self.tx.clone();
        self.settle_timer.arm(&tx, BROADCAST_SETTLE, |generation| {
            SchedulerCommand::BroadcastSettled { generation }
        });
        self.emit_snapshot();
    }

    fn navigate(&mut self, url: String, duration: Option<Duration>) {
        if self.broadcast.is_some() {
            warn!("navigate to {url} ignored during broadcast");
            return;
        }
        info!("navigating to {url} outside the playlist");
        self.rotation_timer.cancel();
        self.settle_timer.cancel();
        self.current = None;
        self.current_url = Some(url.clone());
        self.item_started_at = Some(Instant::now());
        self.current_delay = duration;
        self.deps.display.show(DisplayTarget::Item { url, duration });
        if let Some(after) = duration.filter(|d| !d.is_zero()) {
            if self.running && !self.paused {
                self.arm_rotation(after);
            }
        }
        self.emit_snapshot();
    }

    // ── Timer handlers ────────────────────────────────────────────────────────

    fn on_rotation_due(&mut self) {
        if !self.running || self.paused || self.broadcast.is_some() {
            return;
        }
        self.play_next(true);
    }

    fn on_broadcast_settled(&mut self) {
        if self.rotation.is_empty() {
            self.stop();
            self.deps.display.show(DisplayTarget::Blank);
            self.emit_snapshot();
            return;
        }
        if self.running && !self.paused {
            self.play_next(false);
            return;
        }
        match self.current.and_then(|idx| self.rotation.get(idx)) {
            Some(item) => {
                let url = item.content.url.clone();
                self.deps.display.show(DisplayTarget::Item { url, duration: None });
            }
            None => self.deps.display.show(DisplayTarget::Blank),
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Selects and shows the next valid item, or schedules a retry.
    ///
    /// On a timer tick that lands on the permanent item already on screen
    /// the page is left alone and only the timer is re-armed.
    fn play_next(&mut self, from_timer: bool) {
        if self.rotation.is_empty() {
            return;
        }
        let now = self.deps.clock.now();
        let Some(idx) = self.rotation.select_next(now) else {
            self.no_valid_item();
            return;
        };
        let unchanged = from_timer
            && self.current == Some(idx)
            && self.rotation.get(idx).is_some_and(PlaylistItem::is_permanent);
        if unchanged {
            self.rearm_for(idx);
            self.emit_snapshot();
        } else {
            self.display_item(idx);
        }
    }

    fn display_item(&mut self, idx: usize) {
        let Some(item) = self.rotation.get(idx) else {
            return;
        };
        let url = item.content.url.clone();
        info!("displaying item {} ({url})", item.id);
        self.current = Some(idx);
        self.current_url = Some(url.clone());
        let delay = self.rearm_for(idx);
        self.deps.display.show(DisplayTarget::Item { url, duration: delay });
        self.deps.cadence.set_policy(self.capture_policy());
        self.deps.cadence.item_displayed();
        self.emit_snapshot();
    }

    /// Restarts the display clock for `idx` and arms its rotation timer.
    fn rearm_for(&mut self, idx: usize) -> Option<Duration> {
        let now = self.deps.clock.now();
        let delay = self
            .rotation
            .get(idx)
            .and_then(|item| rotation_delay(item, self.rotation.len(), now));
        self.item_started_at = Some(Instant::now());
        self.current_delay = delay;
        match delay {
            Some(d) => self.arm_rotation(d),
            None => self.rotation_timer.cancel(),
        }
        delay
    }

    fn no_valid_item(&mut self) {
        warn!(
            "no playlist item is valid right now; retrying in {}s",
            NO_VALID_ITEM_RETRY.as_secs()
        );
        self.arm_rotation(NO_VALID_ITEM_RETRY);
        self.emit_snapshot();
    }

    fn arm_rotation(&mut self, delay: Duration) {
        let tx = self.tx.clone();
        self.rotation_timer
            .arm(&tx, delay, |generation| SchedulerCommand::RotationDue { generation });
    }

    fn start_heartbeat(&mut self) {
        if let Some(previous) = self.heartbeat.take() {
            previous.abort();
        }
        let tx = self.tx.clone();
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SNAPSHOT_HEARTBEAT);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(SchedulerCommand::Heartbeat).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_all_timers(&mut self) {
        self.rotation_timer.cancel();
        self.broadcast_timer.cancel();
        self.settle_timer.cancel();
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    fn elapsed_remaining(&self) -> Option<Duration> {
        let delay = self.current_delay?;
        let started = self.item_started_at?;
        Some(delay.saturating_sub(started.elapsed()))
    }

    /// Static displays poll periodically; rotating ones capture per item.
    fn capture_policy(&self) -> CapturePolicy {
        let single_permanent =
            self.rotation.len() == 1 && self.rotation.items().iter().all(PlaylistItem::is_permanent);
        if single_permanent {
            CapturePolicy::Periodic
        } else {
            CapturePolicy::OncePerRotation
        }
    }

    fn snapshot(&self) -> PlaybackStateSnapshot {
        let item = self.current.and_then(|idx| self.rotation.get(idx));
        let time_remaining = match item {
            Some(item) if !item.is_permanent() && self.broadcast.is_none() => {
                let left = if self.paused {
                    self.remaining
                } else {
                    self.elapsed_remaining()
                };
                left.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            _ => None,
        };
        PlaybackStateSnapshot {
            is_playing: self.running && !self.paused,
            is_paused: self.paused,
            is_broadcasting: self.broadcast.is_some(),
            current_item_index: self.current,
            total_items: self.rotation.len(),
            current_url: self.current_url.clone(),
            time_remaining,
            current_item_id: item.map(|i| i.id.clone()),
            playlist_id: self.playlist_id.clone(),
        }
    }

    fn emit_snapshot(&self) {
        self.deps
            .telemetry
            .emit(OutboundEvent::PlaybackState(self.snapshot()));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
