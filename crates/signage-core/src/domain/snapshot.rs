//! Read-only playback state reported to the server.

use serde::{Deserialize, Serialize};

/// A derived view of the scheduler, computed on demand and never stored.
///
/// Emitted after every state transition and on a 5 s heartbeat so an
/// observer that reconnects mid-session converges without asking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStateSnapshot {
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_broadcasting: bool,
    /// Index (in `orderIndex` order) of the on-screen item.
    pub current_item_index: Option<usize>,
    pub total_items: usize,
    pub current_url: Option<String>,
    /// Milliseconds until the next rotation; `null` for permanent items.
    pub time_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
}
