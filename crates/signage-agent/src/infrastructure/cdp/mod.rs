//! Chrome DevTools Protocol adapter for [`BrowserDriver`].
//!
//! - **`process`** – starts the browser and finds its DevTools endpoint.
//! - **`connection`** – request/response correlation and event fan-out over
//!   the DevTools WebSocket.
//! - **`driver`** – [`CdpDriver`], the [`BrowserDriver`] implementation.
//!
//! [`BrowserDriver`]: crate::application::driver::BrowserDriver

pub mod connection;
pub mod driver;
pub mod process;

pub use driver::CdpDriver;
pub use process::LaunchOptions;
