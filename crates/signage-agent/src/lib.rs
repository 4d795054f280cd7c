//! signage-agent library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the agent do? (for beginners)
//!
//! One agent runs on every signage display.  It:
//!
//! 1. Connects to the coordinating server over a WebSocket and registers with
//!    its device token.
//! 2. Receives a playlist (`content-update`) and rotates through it in a
//!    kiosk browser, honouring each item's duration, time window, and days.
//! 3. Accepts live control from the server: pause/resume/next/previous,
//!    broadcast overrides, one-off navigation, and remote mouse/keyboard.
//! 4. Streams a live view of the screen on request and uploads periodic
//!    screenshots, health reports, and playback state.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Server (JSON over WebSocket)
//!         ↕
//! [signage-agent]
//!   ├── domain/           AgentConfig and its validation
//!   ├── application/      Scheduler actor, render/stream controllers,
//!   │                     remote input, screenshots, event dispatch, ports
//!   └── infrastructure/
//!         ├── control/    WebSocket control channel (tokio-tungstenite)
//!         ├── cdp/        Chrome DevTools Protocol browser driver
//!         ├── storage     Persisted runtime overrides (TOML)
//!         ├── health      sysinfo health sampler
//!         ├── cache       Passthrough content cache
//!         └── mock        Recording fakes for the ports
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `signage-core` and talks to the
//!   outside world only through the traits it defines.
//! - `infrastructure` implements those traits with real sockets, processes,
//!   and files.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: use cases and the ports they depend on.
pub mod application;

/// Infrastructure layer: control channel, browser driver, storage, sampling.
pub mod infrastructure;
