//! Infrastructure layer for the signage agent.
//!
//! Contains the adapters that talk to the outside world: the server, the
//! browser, the filesystem, and the kernel.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`, and
//! `signage_core`, but MUST NOT be imported by the `application` or `domain`
//! layers.
//!
//! # Sub-modules
//!
//! - **`control`** – WebSocket client to the server.  Registers the device,
//!   decodes inbound events, queues outbound ones while offline, and
//!   reconnects automatically with backoff.
//!
//! - **`cdp`** – launches the browser and drives it over the DevTools
//!   protocol.
//!
//! - **`storage`** – runtime overrides persisted as TOML in the platform
//!   config directory.
//!
//! - **`health`** – CPU, memory, and uptime sampled from `/proc`.
//!
//! - **`cache`** – a content cache that never caches; every item loads from
//!   its own URL.
//!
//! - **`mock`** – recording fakes for every port, used by tests.

pub mod cache;
pub mod cdp;
pub mod control;
pub mod health;
pub mod mock;
pub mod storage;
