//! Domain rules for the signage agent.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies.  Time is always passed in explicitly (see [`clock`]) so the
//! scheduling rules can be tested at any hour of any day.
//!
//! # What lives here
//!
//! - **`playlist`** – The playlist item wire shape and its day/time validity.
//! - **`rotation`** – The rotation cursor, the constrained selection scan, the
//!   per-item display delay, and playlist-update diffing.
//! - **`broadcast`** – Transient override content and its HTML rendering.
//! - **`display`** – What the scheduler asks the render surface to show.
//! - **`snapshot`** – The read-only playback state reported to the server.
//! - **`navigation`** – URL resolution and per-URL wait strategies.
//! - **`recovery`** – Reconnect backoff and the crash-reload budget.
//! - **`input`** – Remote-input buttons, modifiers, and key descriptors.
//! - **`noise`** – Filters for page errors that are not worth reporting.
//! - **`clock`** – Wall-clock abstraction.

pub mod broadcast;
pub mod clock;
pub mod display;
pub mod input;
pub mod navigation;
pub mod noise;
pub mod playlist;
pub mod recovery;
pub mod rotation;
pub mod snapshot;
