//! The outbound queue shared by every component that reports to the server.
//!
//! # Queueing rules (for beginners)
//!
//! - Ordinary events (status, screenshots, errors, playback state) are
//!   queued while the connection is down and sent after the agent has
//!   registered again.  The queue is bounded; when it is full the newest
//!   event is dropped with a warning.
//! - `screencast-frame` is *volatile*: it is dropped immediately while
//!   disconnected, and a frame that was queued on an older connection is
//!   dropped instead of being sent on the new one.  A stale frame is useless
//!   to a viewer.
//!
//! Each connection gets a new *epoch* number; queued items carry the epoch
//! that was current when they were emitted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use signage_core::OutboundEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::application::telemetry::Telemetry;

/// Outbound events held while the connection is down.
pub const OUTBOX_CAPACITY: usize = 256;

/// One queued outbound event.
#[derive(Debug)]
pub struct Outbound {
    pub epoch: u64,
    pub event: OutboundEvent,
}

impl Outbound {
    /// `true` if this item must not be sent on the connection `epoch`.
    pub fn is_stale(&self, epoch: u64) -> bool {
        self.event.is_volatile() && self.epoch != epoch
    }
}

/// Connection state visible to emitters.
#[derive(Debug, Default)]
pub struct LinkState {
    connected: AtomicBool,
    epoch: AtomicU64,
}

impl LinkState {
    /// Marks the link up and returns the new epoch.
    pub fn connect(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(true, Ordering::SeqCst);
        epoch
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// The [`Telemetry`] handle handed to the rest of the agent.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
    link: Arc<LinkState>,
}

impl OutboundSender {
    pub fn new(tx: mpsc::Sender<Outbound>, link: Arc<LinkState>) -> Self {
        Self { tx, link }
    }
}

impl Telemetry for OutboundSender {
    fn emit(&self, event: OutboundEvent) {
        if event.is_volatile() && !self.link.is_connected() {
            trace!("disconnected; dropping {}", event.event_name());
            return;
        }
        let name = event.event_name();
        let item = Outbound {
            epoch: self.link.epoch(),
            event,
        };
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(item)) => {
                if item.event.is_volatile() {
                    trace!("outbox full; dropping {name}");
                } else {
                    warn!("outbox full; dropping {name}");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => debug!("control channel gone; dropping {name}"),
        }
    }
}
