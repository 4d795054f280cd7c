//! JSON-RPC over the DevTools WebSocket.
//!
//! # Wire format (for beginners)
//!
//! Requests carry an `id` the browser echoes back in the response:
//!
//! ```text
//! → {"id": 7, "method": "Page.navigate", "params": {"url": "..."}, "sessionId": "A1"}
//! ← {"id": 7, "result": {"frameId": "..."}, "sessionId": "A1"}
//! ← {"id": 8, "error": {"code": -32602, "message": "Invalid parameters"}}
//! ```
//!
//! Anything without an `id` is an event:
//!
//! ```text
//! ← {"method": "Page.loadEventFired", "params": {...}, "sessionId": "A1"}
//! ```
//!
//! With flattened sessions every page's traffic shares this one socket and
//! is told apart by `sessionId`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

use crate::application::driver::DriverError;

/// Upper bound for a single request.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Event fan-out capacity; screencast frames are the bulk of it.
const EVENT_CAPACITY: usize = 256;

/// One DevTools event.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: u64,
        result: Result<Value, (Option<i64>, String)>,
    },
    Event(CdpEvent),
}

/// Decodes one text frame.  Returns `None` for anything unrecognised.
pub fn parse_incoming(text: &str) -> Option<Incoming> {
    let mut value: Value = serde_json::from_str(text).ok()?;
    let session_id = value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let result = match value.get("error") {
            Some(error) => Err((
                error.get("code").and_then(Value::as_i64),
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            )),
            None => Ok(value.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        };
        return Some(Incoming::Response { id, result });
    }

    let method = value.get("method")?.as_str()?.to_string();
    let params = value.get_mut("params").map(Value::take).unwrap_or(Value::Null);
    Some(Incoming::Event(CdpEvent {
        method,
        params,
        session_id,
    }))
}

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<Value, DriverError>>>>;

/// A live DevTools connection.
pub struct CdpConnection {
    next_id: AtomicU64,
    pending: Arc<Pending>,
    outgoing: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<CdpEvent>,
    closed: Arc<AtomicBool>,
}

impl CdpConnection {
    /// Connects to a DevTools endpoint and starts the reader and writer tasks.
    ///
    /// `on_close` runs once when the socket goes away.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Connection`] if the WebSocket cannot be opened.
    pub async fn connect<F>(ws_url: &str, on_close: F) -> Result<Arc<Self>, DriverError>
    where
        F: FnOnce() + Send + 'static,
    {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| DriverError::Connection(format!("{ws_url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    debug!("DevTools write failed: {e}");
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_events = events.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("DevTools read failed: {e}");
                        break;
                    }
                };
                match parse_incoming(&text) {
                    Some(Incoming::Response { id, result }) => {
                        let waiter = reader_pending.lock().ok().and_then(|mut p| p.remove(&id));
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(result.map_err(|(code, message)| {
                                DriverError::Protocol { code, message }
                            }));
                        }
                    }
                    Some(Incoming::Event(event)) => {
                        trace!("DevTools event {}", event.method);
                        let _ = reader_events.send(event);
                    }
                    None => warn!("unrecognised DevTools message"),
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            if let Ok(mut pending) = reader_pending.lock() {
                for (_, waiter) in pending.drain() {
                    let _ = waiter.send(Err(DriverError::Connection("browser connection closed".into())));
                }
            }
            debug!("DevTools connection closed");
            on_close();
        });

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending,
            outgoing,
            events,
            closed,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends one request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Protocol`] for an error response,
    /// [`DriverError::Connection`] if the socket is gone, and
    /// [`DriverError::Timeout`] after [`CALL_TIMEOUT`].
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, DriverError> {
        if self.is_closed() {
            return Err(DriverError::NotRunning);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            request["sessionId"] = Value::String(session_id.to_string());
        }

        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        if self.outgoing.send(request.to_string()).is_err() {
            self.forget(id);
            return Err(DriverError::Connection("browser connection closed".into()));
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DriverError::Connection("browser connection closed".into())),
            Err(_) => {
                self.forget(id);
                Err(DriverError::Timeout(CALL_TIMEOUT))
            }
        }
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}
