//! Launching the browser process.
//!
//! The browser is started with `--remote-debugging-port=0`, so it picks a
//! free port and prints the DevTools endpoint on stderr:
//!
//! ```text
//! DevTools listening on ws://127.0.0.1:41233/devtools/browser/6f1c…
//! ```
//!
//! [`BrowserProcess::launch`] waits for that line, then keeps draining stderr
//! into the debug log so the pipe never fills up.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use signage_core::protocol::messages::DisplaySize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::application::driver::DriverError;

/// How long the browser gets to print its DevTools endpoint.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// How to start the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub browser_path: PathBuf,
    pub user_data_dir: Option<PathBuf>,
    pub kiosk: bool,
    pub window: DisplaySize,
}

impl LaunchOptions {
    /// Command-line arguments, without the executable.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--remote-debugging-port=0".to_string(),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--noerrdialogs".to_string(),
            "--disable-infobars".to_string(),
            "--disable-session-crashed-bubble".to_string(),
            "--disable-translate".to_string(),
            "--autoplay-policy=no-user-gesture-required".to_string(),
            format!("--window-size={},{}", self.window.width, self.window.height),
            "--window-position=0,0".to_string(),
        ];
        if self.kiosk {
            args.push("--kiosk".to_string());
        }
        if let Some(dir) = &self.user_data_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }
        args.push("about:blank".to_string());
        args
    }
}

/// Extracts the DevTools WebSocket URL from one stderr line.
pub fn parse_devtools_line(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(DEVTOOLS_PREFIX)?;
    (rest.starts_with("ws://") || rest.starts_with("wss://")).then(|| rest.to_string())
}

/// A running browser.  The process is killed when this is dropped.
pub struct BrowserProcess {
    child: Child,
    ws_url: String,
}

impl BrowserProcess {
    /// Starts the browser and waits for its DevTools endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Launch`] if the executable cannot be started,
    /// exits early, or does not announce an endpoint in time.
    pub async fn launch(options: &LaunchOptions) -> Result<Self, DriverError> {
        info!("launching {}", options.browser_path.display());
        let mut child = Command::new(&options.browser_path)
            .args(options.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::Launch(format!("{}: {e}", options.browser_path.display()))
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DriverError::Launch("browser stderr not captured".into()))?;
        let mut lines = BufReader::new(stderr).lines();

        let found = tokio::time::timeout(STARTUP_TIMEOUT, async {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(url) = parse_devtools_line(&line) {
                    return Some(url);
                }
                debug!("browser: {line}");
            }
            None
        })
        .await;

        let ws_url = match found {
            Ok(Some(url)) => url,
            Ok(None) => return Err(DriverError::Launch("browser exited during startup".into())),
            Err(_) => {
                return Err(DriverError::Launch(format!(
                    "no DevTools endpoint within {}s",
                    STARTUP_TIMEOUT.as_secs()
                )))
            }
        };
        info!("browser DevTools at {ws_url}");

        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("browser: {line}");
            }
        });

        Ok(Self { child, ws_url })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Kills the process and reaps it.
    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("could not kill browser: {e}");
        }
    }
}
