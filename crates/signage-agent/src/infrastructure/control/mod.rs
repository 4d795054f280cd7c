//! WebSocket control channel to the coordinating server.
//!
//! Architecture:
//! - [`ControlChannel`] owns one WebSocket connection at a time and
//!   reconnects forever with capped exponential backoff (5 s doubling to
//!   60 s).
//! - Every connection starts with `device-register`.  Queued outbound events
//!   are flushed after it.
//! - Inbound frames are decoded and forwarded as [`ChannelEvent`]s on an
//!   `mpsc` channel, in arrival order.  Unknown events and malformed payloads
//!   are logged and skipped; they never close the connection.
//! - Outbound events enter through [`OutboundSender`] (see [`outbox`]).
//!
//! The connection URL is the server origin with a `ws`/`wss` scheme and the
//! path `/ws/device`.

pub mod outbox;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use signage_core::domain::recovery::Backoff;
use signage_core::protocol::messages::DeviceRegistration;
use signage_core::{decode_inbound, encode_outbound, InboundEvent, OutboundEvent, ProtocolError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

pub use outbox::{LinkState, Outbound, OutboundSender, OUTBOX_CAPACITY};

/// Path of the device endpoint on the server.
pub const DEVICE_WS_PATH: &str = "/ws/device";

/// WebSocket ping cadence while connected.
pub const PING_INTERVAL: Duration = Duration::from_secs(25);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("cannot derive a WebSocket URL from {origin}")]
    InvalidOrigin { origin: String },

    #[error("WebSocket connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("WebSocket error: {0}")]
    Socket(#[from] WsError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection closed by server")]
    Closed,
}

/// What the channel reports to the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connected and registered.
    Connected,
    Event(InboundEvent),
    Disconnected,
}

/// Maps `http(s)://host[:port]/...` to `ws(s)://host[:port]/ws/device`.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidOrigin`] for origins without an http(s)
/// scheme.
pub fn websocket_url(origin: &Url) -> Result<Url, ChannelError> {
    let invalid = || ChannelError::InvalidOrigin {
        origin: origin.to_string(),
    };
    let scheme = match origin.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(invalid()),
    };
    let mut url = origin.clone();
    url.set_scheme(scheme).map_err(|()| invalid())?;
    url.set_path(DEVICE_WS_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

pub struct ControlChannel {
    url: Url,
    registration: DeviceRegistration,
    link: Arc<LinkState>,
    sender: OutboundSender,
    outbox: Mutex<Option<mpsc::Receiver<Outbound>>>,
    closing: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Creates a channel for `origin`.  Nothing connects until
    /// [`ControlChannel::start`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidOrigin`] if `origin` is not http(s).
    pub fn new(origin: &Url, registration: DeviceRegistration) -> Result<Self, ChannelError> {
        let url = websocket_url(origin)?;
        let link = Arc::new(LinkState::default());
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        Ok(Self {
            url,
            registration,
            sender: OutboundSender::new(tx, link.clone()),
            link,
            outbox: Mutex::new(Some(rx)),
            closing: watch::Sender::new(false),
            task: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The telemetry handle for the rest of the agent.
    pub fn sender(&self) -> OutboundSender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Starts the connect/reconnect loop and returns the inbound event stream.
    ///
    /// Calling `start` twice returns a receiver that never yields.
    pub fn start(self: Arc<Self>) -> mpsc::Receiver<ChannelEvent> {
        let (tx, rx) = mpsc::channel(128);
        let outbox = self.outbox.lock().ok().and_then(|mut o| o.take());
        let Some(mut outbox) = outbox else {
            warn!("control channel already started");
            return rx;
        };

        let this = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut closing = this.closing.subscribe();
            let mut backoff = Backoff::reconnect();
            while !*closing.borrow_and_update() {
                match connect_async(this.url.as_str()).await {
                    Ok((ws, _)) => {
                        backoff.reset();
                        let epoch = this.link.connect();
                        info!("connected to {}", this.url);
                        let result = this.session(ws, &mut outbox, &tx, epoch).await;
                        this.link.disconnect();
                        let _ = tx.send(ChannelEvent::Disconnected).await;
                        match result {
                            Ok(()) => info!("control channel closed"),
                            Err(e) => warn!("control channel lost: {e}"),
                        }
                    }
                    Err(source) => {
                        let e = ChannelError::Connect {
                            url: this.url.to_string(),
                            source,
                        };
                        warn!("{e}");
                    }
                }

                if *closing.borrow_and_update() {
                    break;
                }
                let delay = backoff.next_delay();
                info!("reconnecting in {}s (attempt {})", delay.as_secs(), backoff.attempt());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = closing.changed() => {}
                }
            }
            debug!("control channel loop ended");
        });

        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
        rx
    }

    /// Flushes what is queued, closes the connection, and stops
    /// reconnecting.  Waits at most `grace`.
    pub async fn close(&self, grace: Duration) {
        self.closing.send_replace(true);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!("control channel did not close within {}ms", grace.as_millis());
            }
        }
    }

    /// Runs one connection until it drops or the channel is closed.
    async fn session(
        &self,
        ws: WsStream,
        outbox: &mut mpsc::Receiver<Outbound>,
        events: &mpsc::Sender<ChannelEvent>,
        epoch: u64,
    ) -> Result<(), ChannelError> {
        let (mut sink, mut stream) = ws.split();

        let register = encode_outbound(&OutboundEvent::DeviceRegister(self.registration.clone()))?;
        sink.send(WsMessage::Text(register)).await?;
        info!("registered with the server");
        if events.send(ChannelEvent::Connected).await.is_err() {
            return Ok(());
        }

        let mut closing = self.closing.subscribe();
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(event) = decode_logged(&text) {
                            if events.send(ChannelEvent::Event(event)).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Err(ChannelError::Closed),
                    Some(Ok(WsMessage::Binary(_))) => warn!("unexpected binary frame (ignored)"),
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed)) => return Err(ChannelError::Closed),
                    Some(Err(e)) => return Err(e.into()),
                },
                queued = outbox.recv() => match queued {
                    Some(item) => send_queued(&mut sink, item, epoch).await?,
                    None => return Ok(()),
                },
                _ = ping.tick() => {
                    sink.send(WsMessage::Ping(Vec::new())).await?;
                }
                _ = closing.changed() => {
                    while let Ok(item) = outbox.try_recv() {
                        send_queued(&mut sink, item, epoch).await?;
                    }
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

async fn send_queued<S>(sink: &mut S, item: Outbound, epoch: u64) -> Result<(), ChannelError>
where
    S: futures_util::Sink<WsMessage, Error = WsError> + Unpin,
{
    if item.is_stale(epoch) {
        trace!("dropping {} from a previous connection", item.event.event_name());
        return Ok(());
    }
    match encode_outbound(&item.event) {
        Ok(text) => sink.send(WsMessage::Text(text)).await?,
        Err(e) => warn!("{e}"),
    }
    Ok(())
}

fn decode_logged(text: &str) -> Option<InboundEvent> {
    match decode_inbound(text) {
        Ok(event) => {
            debug!("received {}", event.kind());
            Some(event)
        }
        Err(ProtocolError::UnknownEvent(name)) => {
            debug!("ignoring unknown event {name:?}");
            None
        }
        Err(e) => {
            warn!("skipping inbound message: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::telemetry::Telemetry;
    use signage_core::protocol::messages::{
        DeviceStatus, DeviceStatusKind, DisplaySize, FrameMetadata, ScreencastFrame,
    };
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn registration() -> DeviceRegistration {
        DeviceRegistration {
            token: "tok-123".into(),
            agent_version: "0.1.0".into(),
            display: DisplaySize { width: 1920, height: 1080 },
        }
    }

    fn status(kind: DeviceStatusKind) -> OutboundEvent {
        OutboundEvent::DeviceStatus(DeviceStatus {
            status: kind,
            message: None,
        })
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("server stream ended: {other:?}"),
            }
        }
    }

    async fn listener() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Url::parse(&format!("http://127.0.0.1:{port}")).unwrap())
    }

    #[test]
    fn test_websocket_url_maps_scheme_and_path() {
        let https = Url::parse("https://signage.example.com/admin?x=1").unwrap();
        let http = Url::parse("http://10.0.0.5:8080").unwrap();

        assert_eq!(
            websocket_url(&https).unwrap().as_str(),
            "wss://signage.example.com/ws/device"
        );
        assert_eq!(websocket_url(&http).unwrap().as_str(), "ws://10.0.0.5:8080/ws/device");
        assert!(websocket_url(&Url::parse("ftp://example.com").unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_registers_first_then_flushes_queued_events() {
        // Arrange: queue events before anything is connected.
        let (listener, origin) = listener().await;
        let channel = Arc::new(ControlChannel::new(&origin, registration()).unwrap());
        let sender = channel.sender();
        sender.emit(status(DeviceStatusKind::Online));
        sender.emit(OutboundEvent::ScreencastFrame(ScreencastFrame {
            data: "AAAA".into(),
            metadata: FrameMetadata::default(),
        }));

        // Act
        let mut events = Arc::clone(&channel).start();
        let (socket, _) = listener.accept().await.unwrap();
        let mut server = accept_async(socket).await.unwrap();

        // Assert
        let register = next_text(&mut server).await;
        assert_eq!(register["event"], "device-register");
        assert_eq!(register["payload"]["token"], "tok-123");
        assert_eq!(next_text(&mut server).await["event"], "device-status");

        assert_eq!(events.recv().await, Some(ChannelEvent::Connected));
        sender.emit(status(DeviceStatusKind::Error));
        let after = next_text(&mut server).await;
        assert_eq!(after["event"], "device-status");
        assert_eq!(after["payload"]["status"], "error");

        channel.close(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_inbound_events_arrive_in_order_and_unknown_ones_are_skipped() {
        // Arrange
        let (listener, origin) = listener().await;
        let channel = Arc::new(ControlChannel::new(&origin, registration()).unwrap());
        let mut events = Arc::clone(&channel).start();
        let (socket, _) = listener.accept().await.unwrap();
        let mut server = accept_async(socket).await.unwrap();
        next_text(&mut server).await;

        // Act
        for text in [
            r#"{"event":"playlist-pause"}"#,
            r#"{"event":"firmware-update","payload":{}}"#,
            r#"{"event":"remote-click","payload":{"x":"left"}}"#,
            r#"{"event":"playlist-resume","payload":{}}"#,
        ] {
            server.send(WsMessage::Text(text.to_string())).await.unwrap();
        }

        // Assert
        assert_eq!(events.recv().await, Some(ChannelEvent::Connected));
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Event(InboundEvent::PlaylistPause))
        );
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Event(InboundEvent::PlaylistResume))
        );

        channel.close(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_server_close_reports_disconnect() {
        let (listener, origin) = listener().await;
        let channel = Arc::new(ControlChannel::new(&origin, registration()).unwrap());
        let mut events = Arc::clone(&channel).start();
        let (socket, _) = listener.accept().await.unwrap();
        let mut server = accept_async(socket).await.unwrap();
        next_text(&mut server).await;

        server.close(None).await.unwrap();

        assert_eq!(events.recv().await, Some(ChannelEvent::Connected));
        assert_eq!(events.recv().await, Some(ChannelEvent::Disconnected));
        assert!(!channel.is_connected());
        channel.close(Duration::from_millis(100)).await;
    }
}
