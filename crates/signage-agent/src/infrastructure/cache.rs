//! The default content cache: caches nothing.
//!
//! Every URL is reported as non-cacheable, so navigation always goes to the
//! remote URL.  A disk-backed cache can replace it without touching the
//! render controller.

use std::time::Duration;

use async_trait::async_trait;
use signage_core::PlaylistItem;
use tracing::debug;

use crate::application::content_cache::ContentCache;

pub struct PassthroughCache;

#[async_trait]
impl ContentCache for PassthroughCache {
    fn is_cacheable(&self, _url: &str) -> bool {
        false
    }

    async fn wait_for_cache(&self, _url: &str, _timeout: Duration) -> Option<String> {
        None
    }

    fn local_path(&self, _url: &str) -> Option<String> {
        None
    }

    async fn sync_playlist(&self, items: &[PlaylistItem]) {
        debug!("passthrough cache: nothing to sync for {} item(s)", items.len());
    }
}
