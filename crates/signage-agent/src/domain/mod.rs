//! Domain layer for the agent.
//!
//! - **`config`** – [`AgentConfig`], the validated startup configuration, and
//!   [`RuntimeOverrides`], the settings the server may change live.

pub mod config;

pub use config::{AgentConfig, ConfigError, RawConfig, RuntimeOverrides};
