//! # signage-core
//!
//! Shared library for the signage device agent containing the scheduling
//! rules, navigation heuristics, recovery policies, and the control-channel
//! protocol.
//!
//! This crate has zero dependencies on the async runtime, the browser, or
//! network sockets.  Everything in it can be unit-tested with a fixed clock.
//!
//! # Architecture overview (for beginners)
//!
//! A signage *device agent* runs on every display in the fleet.  It receives a
//! playlist from the coordinating server, rotates through the playlist items
//! in a browser, and reports back what it is showing.
//!
//! This crate (`signage-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure rules with no I/O: which playlist item is valid right
//!   now, how long it stays on screen, when a playlist update forces a
//!   restart, how long to wait before retrying a crashed page, and which page
//!   errors are noise.
//!
//! - **`protocol`** – How messages travel over the control channel.  Every
//!   message is a JSON envelope `{"event": "...", "payload": {...}}`, decoded
//!   exactly once into a typed [`InboundEvent`] at the boundary.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `signage_core::PlaylistItem` instead of the longer module path.
pub use domain::broadcast::{BroadcastKind, BroadcastOverride, BroadcastStyle, LogoPosition};
pub use domain::clock::{Clock, ManualClock, SystemClock};
pub use domain::display::DisplayTarget;
pub use domain::playlist::{ContentRef, PlaylistError, PlaylistItem, TimeWindow};
pub use domain::rotation::{ReloadPlan, Rotation};
pub use domain::snapshot::PlaybackStateSnapshot;
pub use protocol::codec::{decode_inbound, encode_outbound, ProtocolError};
pub use protocol::messages::{EventKind, InboundEvent, OutboundEvent};
