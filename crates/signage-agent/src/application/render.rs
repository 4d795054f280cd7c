//! RenderController: owns the display surface.
//!
//! # Responsibilities (for beginners)
//!
//! - **Active surface**: the browser may open extra windows (an OAuth popup,
//!   for example).  The controller follows whichever surface appeared most
//!   recently, both from driver events and from a slow poll of the surface
//!   list.  Every switch re-attaches, reapplies the viewport, and is published
//!   on a `watch` channel so the stream controller can follow.
//! - **Navigation**: relative URLs resolve against the server origin, the
//!   content cache is consulted, video and broadcast pages are left through a
//!   blank page, and each URL gets a wait strategy from
//!   [`signage_core::domain::navigation::profile_for`] with one retry.
//! - **Crash recovery**: a crashed page is reloaded at its last known-good
//!   URL with a growing backoff; too many crashes inside the window relaunch
//!   the whole browser.
//!
//! Navigation failures are reported and swallowed; nothing here ever stops
//! the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use signage_core::domain::broadcast::BroadcastPage;
use signage_core::domain::navigation::{
    is_video_like, profile_for, resolve_url, NavigationProfile, WaitStrategy, BLANK_URL,
};
use signage_core::domain::noise::is_benign_page_error;
use signage_core::domain::recovery::{CrashAction, CrashBudget};
use signage_core::protocol::messages::{DisplaySize, ErrorKind, ErrorReport};
use signage_core::{BroadcastOverride, DisplayTarget};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::application::content_cache::{ContentCache, CACHE_WAIT};
use crate::application::driver::{BrowserDriver, DriverError, DriverEvent, SurfaceId};
use crate::application::scheduler::ContentDisplay;
use crate::application::screenshots::FrameCapturer;
use crate::application::telemetry::Telemetry;

/// Fallback poll of the surface list.
pub const SURFACE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Timeout for the blank intermediate page.
const BLANK_TIMEOUT: Duration = Duration::from_secs(5);

/// JPEG quality for single screenshots.
const SCREENSHOT_QUALITY: u8 = 70;

/// Unregisters service workers and clears their caches.  Resolves to the
/// number of workers removed.
const CLEAR_WORKERS_JS: &str = r#"(async () => {
  let removed = 0;
  if ('serviceWorker' in navigator) {
    const regs = await navigator.serviceWorker.getRegistrations();
    await Promise.all(regs.map((r) => r.unregister()));
    removed = regs.length;
  }
  if (window.caches) {
    const keys = await caches.keys();
    await Promise.all(keys.map((k) => caches.delete(k)));
  }
  return removed;
})()"#;

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("no live surface to navigate")]
    NoSurface,

    #[error("navigation to {url} failed: {source}")]
    Failed {
        url: String,
        #[source]
        source: DriverError,
    },
}

/// What kind of page is on screen; decides whether the next navigation goes
/// through a blank page first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Showing {
    Nothing,
    Page,
    Video,
    Broadcast,
}

#[derive(Debug)]
struct PageState {
    current_url: Option<String>,
    last_good_url: Option<String>,
    showing: Showing,
}

pub struct RenderController {
    driver: Arc<dyn BrowserDriver>,
    telemetry: Arc<dyn Telemetry>,
    cache: Arc<dyn ContentCache>,
    origin: Url,
    viewport: Mutex<DisplaySize>,
    active: watch::Sender<Option<SurfaceId>>,
    page: Mutex<PageState>,
    /// Serializes navigations.
    navigation: tokio::sync::Mutex<()>,
    crashes: Mutex<CrashBudget>,
    recovering: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RenderController {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        telemetry: Arc<dyn Telemetry>,
        cache: Arc<dyn ContentCache>,
        origin: Url,
        viewport: DisplaySize,
    ) -> Self {
        Self {
            driver,
            telemetry,
            cache,
            origin,
            viewport: Mutex::new(viewport),
            active: watch::Sender::new(None),
            page: Mutex::new(PageState {
                current_url: None,
                last_good_url: None,
                showing: Showing::Nothing,
            }),
            navigation: tokio::sync::Mutex::new(()),
            crashes: Mutex::new(CrashBudget::default()),
            recovering: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Launches the browser, picks the active surface, and starts the event
    /// loop and the surface poll.
    ///
    /// # Errors
    ///
    /// Returns the driver error if the browser cannot be launched.
    pub async fn start(self: &Arc<Self>) -> Result<(), DriverError> {
        // Subscribe before launching so no surface event is missed.
        let events = self.driver.subscribe();
        self.driver.launch().await?;
        self.refresh_surfaces().await;

        let this = Arc::clone(self);
        let event_loop = tokio::spawn(async move { this.event_loop(events).await });

        let this = Arc::clone(self);
        let poll = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SURFACE_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.refresh_surfaces().await;
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(event_loop);
            tasks.push(poll);
        }
        Ok(())
    }

    /// Stops the background tasks and the browser.
    pub async fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Err(e) = self.driver.shutdown().await {
            warn!("browser shutdown failed: {e}");
        }
        self.active.send_replace(None);
    }

    /// Follows changes of the active surface.
    pub fn subscribe_surface(&self) -> watch::Receiver<Option<SurfaceId>> {
        self.active.subscribe()
    }

    pub fn active_surface(&self) -> Option<SurfaceId> {
        self.active.borrow().clone()
    }

    /// The active surface if it is still open.
    pub async fn live_surface(&self) -> Option<SurfaceId> {
        let surface = self.active_surface()?;
        if self.driver.is_alive(&surface).await {
            Some(surface)
        } else {
            debug!("active surface {surface} is gone");
            None
        }
    }

    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.driver
    }

    // ── Active-surface tracking ───────────────────────────────────────────────

    async fn event_loop(self: Arc<Self>, mut events: broadcast::Receiver<DriverEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("render controller skipped {n} browser events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                DriverEvent::SurfaceCreated(surface) => {
                    info!("new surface {surface}");
                    self.switch_to(surface).await;
                }
                DriverEvent::SurfaceDestroyed(surface) => {
                    if self.active_surface().as_ref() == Some(&surface) {
                        info!("active surface {surface} closed");
                        self.refresh_surfaces().await;
                    }
                }
                DriverEvent::SurfaceCrashed(surface) => {
                    if self.active_surface().as_ref() == Some(&surface) {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move { this.handle_crash().await });
                    }
                }
                DriverEvent::PageError { surface, message } => {
                    self.on_page_error(&surface, &message);
                }
                DriverEvent::BrowserExited => {
                    error!("browser process exited");
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.relaunch().await });
                }
                DriverEvent::ScreencastFrame { .. } => {}
            }
        }
        debug!("render event loop ended");
    }

    /// Makes the newest open surface active if it is not already.
    pub async fn refresh_surfaces(&self) {
        match self.driver.surfaces().await {
            Ok(surfaces) => match surfaces.last() {
                Some(newest) if self.active_surface().as_ref() != Some(newest) => {
                    self.switch_to(newest.clone()).await;
                }
                Some(_) => {}
                None => {
                    if self.active.send_replace(None).is_some() {
                        warn!("no open surfaces");
                    }
                }
            },
            Err(e) => debug!("surface poll failed: {e}"),
        }
    }

    async fn switch_to(&self, surface: SurfaceId) {
        if let Err(e) = self.driver.attach(&surface).await {
            warn!("cannot attach to surface {surface}: {e}");
            return;
        }
        let DisplaySize { width, height } = self.viewport();
        if let Err(e) = self.driver.set_viewport(&surface, width, height).await {
            warn!("cannot set viewport on {surface}: {e}");
        }
        info!("active surface is now {surface}");
        self.active.send_replace(Some(surface));
    }

    fn on_page_error(&self, surface: &SurfaceId, message: &str) {
        if is_benign_page_error(message) {
            debug!("ignoring page noise on {surface}: {message}");
            return;
        }
        warn!("page error on {surface}: {message}");
        let mut report = ErrorReport::new(ErrorKind::Page, message);
        if let Some(url) = self.current_url() {
            report = report.with_url(url);
        }
        self.telemetry.report(report);
    }

    // ── Display ───────────────────────────────────────────────────────────────

    /// Puts `target` on screen.  Failures are reported, never returned.
    pub async fn display(&self, target: DisplayTarget) {
        let result = match target {
            DisplayTarget::Item { url, .. } => self.navigate_to(&url).await,
            DisplayTarget::Broadcast(broadcast) => self.show_broadcast(&broadcast).await,
            DisplayTarget::Blank => self.show_blank().await,
        };
        if let Err(e) = result {
            warn!("display failed: {e}");
        }
    }

    /// Navigates the active surface to `raw` (absolute or origin-relative).
    ///
    /// # Errors
    ///
    /// Returns [`NavigationError`] after the error has been reported; callers
    /// only log it.
    pub async fn navigate_to(&self, raw: &str) -> Result<(), NavigationError> {
        let _guard = self.navigation.lock().await;
        let url = resolve_url(&self.origin, raw).map_err(|source| NavigationError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;
        let target = self.cached_target(&url).await;
        let surface = self.live_surface().await.ok_or(NavigationError::NoSurface)?;

        let showing = if is_video_like(&target) {
            Showing::Video
        } else {
            Showing::Page
        };
        self.load(&surface, &target, profile_for(&url), showing).await
    }

    async fn show_broadcast(&self, broadcast: &BroadcastOverride) -> Result<(), NavigationError> {
        let _guard = self.navigation.lock().await;
        let surface = self.live_surface().await.ok_or(NavigationError::NoSurface)?;

        match broadcast.page() {
            BroadcastPage::Navigate(raw) => {
                let url = resolve_url(&self.origin, &raw)
                    .map_err(|source| NavigationError::InvalidUrl { url: raw, source })?;
                let target = url.to_string();
                self.load(&surface, &target, profile_for(&url), Showing::Broadcast)
                    .await
            }
            BroadcastPage::Document(html) => {
                self.blank(&surface).await;
                let result = self.driver.set_document(&surface, &html).await;
                self.set_showing(None, Showing::Broadcast);
                result.map_err(|source| {
                    self.report_navigation(BLANK_URL, &source, true);
                    NavigationError::Failed {
                        url: BLANK_URL.to_string(),
                        source,
                    }
                })
            }
        }
    }

    async fn show_blank(&self) -> Result<(), NavigationError> {
        let _guard = self.navigation.lock().await;
        let surface = self.live_surface().await.ok_or(NavigationError::NoSurface)?;
        self.blank(&surface).await;
        self.set_showing(None, Showing::Nothing);
        Ok(())
    }

    /// Reloads the current page (`display-refresh`).
    pub async fn reload(&self) {
        let Some(surface) = self.live_surface().await else {
            return;
        };
        info!("reloading {:?}", self.current_url());
        if let Err(e) = self.driver.reload(&surface).await {
            warn!("reload failed: {e}");
        }
    }

    pub fn current_url(&self) -> Option<String> {
        self.page.lock().ok().and_then(|page| page.current_url.clone())
    }

    pub fn last_good_url(&self) -> Option<String> {
        self.page.lock().ok().and_then(|page| page.last_good_url.clone())
    }

    pub fn viewport(&self) -> DisplaySize {
        self.viewport
            .lock()
            .map(|v| *v)
            .unwrap_or(DisplaySize { width: 1920, height: 1080 })
    }

    /// Changes the viewport and applies it to the active surface.
    pub async fn set_viewport(&self, width: u32, height: u32) {
        if let Ok(mut viewport) = self.viewport.lock() {
            *viewport = DisplaySize { width, height };
        }
        if let Some(surface) = self.live_surface().await {
            if let Err(e) = self.driver.set_viewport(&surface, width, height).await {
                warn!("cannot resize surface {surface}: {e}");
            }
        }
    }

    /// Leaves the current page for a blank one if it was video or broadcast
    /// content, then loads `target` with one retry.
    async fn load(
        &self,
        surface: &SurfaceId,
        target: &str,
        profile: NavigationProfile,
        showing: Showing,
    ) -> Result<(), NavigationError> {
        if matches!(self.showing(), Showing::Video | Showing::Broadcast) {
            debug!("leaving transient content through a blank page");
            self.blank(surface).await;
        }

        info!("navigating to {target} ({:?}, {:?})", profile.kind, profile.wait);
        match self.load_with_retry(surface, target, profile).await {
            Ok(()) => {
                let last_good = (showing != Showing::Broadcast).then(|| target.to_string());
                if let Ok(mut page) = self.page.lock() {
                    page.current_url = Some(target.to_string());
                    page.showing = showing;
                    if last_good.is_some() {
                        page.last_good_url = last_good;
                    }
                }
                Ok(())
            }
            Err(source) => {
                self.set_showing(Some(target.to_string()), showing);
                self.report_navigation(target, &source, true);
                Err(NavigationError::Failed {
                    url: target.to_string(),
                    source,
                })
            }
        }
    }

    async fn load_with_retry(
        &self,
        surface: &SurfaceId,
        target: &str,
        profile: NavigationProfile,
    ) -> Result<(), DriverError> {
        let first = self
            .driver
            .navigate(surface, target, profile.wait, profile.timeout)
            .await;
        let err = match first {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if let (DriverError::Timeout(_), Some(fallback)) = (&err, profile.fallback) {
            warn!("navigation to {target} timed out; retrying with {fallback:?}");
            self.report_navigation(target, &err, false);
            return self
                .driver
                .navigate(surface, target, fallback, profile.timeout)
                .await;
        }

        if err.is_aborted() {
            warn!("navigation to {target} was aborted; clearing service workers and retrying");
            match self.driver.evaluate(surface, CLEAR_WORKERS_JS).await {
                Ok(removed) => debug!("removed service workers: {removed}"),
                Err(e) => debug!("service worker cleanup failed: {e}"),
            }
            return self
                .driver
                .navigate(surface, target, profile.wait, profile.timeout)
                .await;
        }

        Err(err)
    }

    async fn blank(&self, surface: &SurfaceId) {
        if let Err(e) = self
            .driver
            .navigate(surface, BLANK_URL, WaitStrategy::Load, BLANK_TIMEOUT)
            .await
        {
            debug!("blank page did not load cleanly: {e}");
        }
    }

    /// Swaps a cacheable URL for its local copy when one is ready.
    async fn cached_target(&self, url: &Url) -> String {
        let remote = url.to_string();
        if !self.cache.is_cacheable(&remote) {
            return remote;
        }
        let local = match self.cache.local_path(&remote) {
            Some(path) => Some(path),
            None => self.cache.wait_for_cache(&remote, CACHE_WAIT).await,
        };
        match local {
            Some(path) if path.starts_with('/') => Url::from_file_path(&path)
                .map(String::from)
                .unwrap_or(remote),
            Some(path) => path,
            None => remote,
        }
    }

    fn showing(&self) -> Showing {
        self.page
            .lock()
            .map(|page| page.showing)
            .unwrap_or(Showing::Nothing)
    }

    fn set_showing(&self, url: Option<String>, showing: Showing) {
        if let Ok(mut page) = self.page.lock() {
            page.current_url = url;
            page.showing = showing;
        }
    }

    fn report_navigation(&self, url: &str, err: &DriverError, critical: bool) {
        let report = ErrorReport::new(ErrorKind::Navigation, err.to_string()).with_url(url);
        self.telemetry
            .report(if critical { report.critical() } else { report });
    }

    // ── Crash recovery ────────────────────────────────────────────────────────

    /// Reacts to a crashed page: reload with backoff, or relaunch once the
    /// crash budget is spent.  Overlapping calls are dropped.
    pub async fn handle_crash(&self) {
        if self.recovering.swap(true, Ordering::SeqCst) {
            debug!("crash recovery already running");
            return;
        }

        let now = tokio::time::Instant::now().into_std();
        let action = match self.crashes.lock() {
            Ok(mut budget) => budget.record_failure(now),
            Err(_) => CrashAction::Relaunch,
        };
        let url = self.last_good_url();

        match action {
            CrashAction::Reload { attempt, backoff } => {
                warn!("page crashed (attempt {attempt}); reloading in {}ms", backoff.as_millis());
                let mut report =
                    ErrorReport::new(ErrorKind::Crash, format!("page crashed (attempt {attempt})"));
                if let Some(url) = &url {
                    report = report.with_url(url.clone());
                }
                self.telemetry.report(report);
                tokio::time::sleep(backoff).await;
                self.restore(url.as_deref()).await;
            }
            CrashAction::Relaunch => {
                error!("page keeps crashing; relaunching the browser");
                self.telemetry.report(
                    ErrorReport::new(ErrorKind::Crash, "crash budget exhausted; relaunching browser")
                        .critical(),
                );
                self.relaunch_inner(url.as_deref()).await;
            }
        }

        self.recovering.store(false, Ordering::SeqCst);
    }

    /// Relaunches the browser after it exited on its own.
    async fn relaunch(&self) {
        if self.recovering.swap(true, Ordering::SeqCst) {
            return;
        }
        let url = self.last_good_url();
        self.relaunch_inner(url.as_deref()).await;
        self.recovering.store(false, Ordering::SeqCst);
    }

    async fn relaunch_inner(&self, url: Option<&str>) {
        if let Err(e) = self.driver.shutdown().await {
            debug!("shutdown before relaunch failed: {e}");
        }
        self.active.send_replace(None);
        self.set_showing(None, Showing::Nothing);
        if let Err(e) = self.driver.launch().await {
            error!("browser relaunch failed: {e}");
            self.telemetry.report(
                ErrorReport::new(ErrorKind::Crash, format!("browser relaunch failed: {e}")).critical(),
            );
            return;
        }
        self.refresh_surfaces().await;
        self.restore(url).await;
    }

    async fn restore(&self, url: Option<&str>) {
        let result = match url {
            Some(url) => self.navigate_to(url).await,
            None => self.show_blank().await,
        };
        if let Err(e) = result {
            warn!("recovery navigation failed: {e}");
        }
    }
}

#[async_trait]
impl FrameCapturer for RenderController {
    async fn capture(&self) -> Option<String> {
        let surface = self.live_surface().await?;
        match self.driver.screenshot(&surface, SCREENSHOT_QUALITY).await {
            Ok(image) => Some(image),
            Err(e) => {
                debug!("screenshot failed: {e}");
                None
            }
        }
    }

    fn current_url(&self) -> Option<String> {
        RenderController::current_url(self)
    }
}

// ── Display queue ─────────────────────────────────────────────────────────────

/// Hands scheduler decisions to the render controller without blocking the
/// scheduler.  Only the latest target matters: if several arrive while a
/// navigation is in flight, the intermediate ones are skipped.
pub struct DisplayQueue {
    tx: watch::Sender<Option<DisplayTarget>>,
    worker: JoinHandle<()>,
}

impl DisplayQueue {
    pub fn spawn(render: Arc<RenderController>) -> Self {
        let (tx, mut rx) = watch::channel(None::<DisplayTarget>);
        let worker = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let target = rx.borrow_and_update().clone();
                if let Some(target) = target {
                    render.display(target).await;
                }
            }
        });
        Self { tx, worker }
    }
}

impl ContentDisplay for DisplayQueue {
    fn show(&self, target: DisplayTarget) {
        self.tx.send_replace(Some(target));
    }
}

impl Drop for DisplayQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
