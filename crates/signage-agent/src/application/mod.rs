//! Application layer for the signage agent.
//!
//! Contains the use cases and the ports (traits) they depend on.  Nothing in
//! here opens a socket, spawns a process, or touches the filesystem directly.
//!
//! **Dependency rule**: this layer may depend on `domain` and `signage_core`.
//! It must NOT import from `infrastructure`.
//!
//! # Sub-modules
//!
//! - **`scheduler`** – the content scheduler actor: playlist rotation, pause,
//!   manual stepping, broadcast overrides, playback-state heartbeat.
//! - **`render`** – owns the active browser surface: navigation, crash
//!   recovery, and the display queue the scheduler feeds.
//! - **`stream`** – live screencast sessions with a stall watchdog.
//! - **`input`** – remote mouse and keyboard.
//! - **`screenshots`** – periodic and on-demand captures, preview mode.
//! - **`health`** – health reports and `online` heartbeats.
//! - **`settings`** – live `config-update` handling and persisted overrides.
//! - **`dispatch`** – routes inbound events to the components above.
//! - **`driver`**, **`telemetry`**, **`content_cache`** – the ports.

pub mod content_cache;
pub mod dispatch;
pub mod driver;
pub mod health;
pub mod input;
pub mod render;
pub mod scheduler;
pub mod screenshots;
pub mod settings;
pub mod stream;
pub mod telemetry;
