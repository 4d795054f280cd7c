//! Outbound telemetry port.

use signage_core::protocol::messages::{ErrorReport, OutboundEvent};

/// Anything that can carry an event to the server.
///
/// `emit` never blocks and never fails: the control channel queues, drops, or
/// sends as its connection state allows.
pub trait Telemetry: Send + Sync {
    fn emit(&self, event: OutboundEvent);

    fn report(&self, report: ErrorReport) {
        self.emit(OutboundEvent::ErrorReport(report));
    }
}
