//! Content cache port.
//!
//! A cache may keep local copies of large media so a flaky uplink does not
//! blank the screen.  Navigation asks the cache first and falls back to the
//! remote URL whenever no local copy is ready.

use std::time::Duration;

use async_trait::async_trait;
use signage_core::PlaylistItem;

/// How long navigation waits for a cacheable URL to finish downloading.
pub const CACHE_WAIT: Duration = Duration::from_secs(10);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Returns `true` if `url` is worth caching (media files, typically).
    fn is_cacheable(&self, url: &str) -> bool;

    /// Waits up to `timeout` for a local copy of `url`.
    async fn wait_for_cache(&self, url: &str, timeout: Duration) -> Option<String>;

    /// Returns the local copy of `url` if it is already present.
    fn local_path(&self, url: &str) -> Option<String>;

    /// Brings the cache in line with a new playlist.
    async fn sync_playlist(&self, items: &[PlaylistItem]);
}
