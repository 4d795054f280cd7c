//! What the scheduler asks the render surface to show.

use std::time::Duration;

use crate::domain::broadcast::BroadcastOverride;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayTarget {
    /// A playlist item (or a one-off server navigation).
    Item {
        url: String,
        /// Planned on-screen time, `None` when the item stays indefinitely.
        duration: Option<Duration>,
    },
    /// A transient broadcast override.
    Broadcast(BroadcastOverride),
    /// An empty page, used when the playlist is cleared.
    Blank,
}

impl DisplayTarget {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, DisplayTarget::Broadcast(_))
    }
}
