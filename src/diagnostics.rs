//! Structured diagnostic events emitted by the gateway.
//!
//! Transport failures, dropped payloads and subscriber errors never reach
//! callers of the gateway API. They are logged and, in addition, published
//! here so operators and tests can observe them without scraping logs.

use crate::types::{ApiError, EventCategory};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Socket opened; the attempt counter has been reset.
    Connected,
    /// Connection could not be established. Handled like a close.
    ConnectFailed { error: String },
    /// Socket ended. `reconnect_attempts` is the counter before backoff bookkeeping.
    Disconnected { reconnect_attempts: u32 },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Retry budget spent; push delivery resumes only via the health check or a reset.
    ReconnectExhausted { attempts: u32 },
    HealthCheckReconnect,
    /// Subscribe frame written to the socket.
    Subscribed { events: Vec<EventCategory> },
    MalformedPayload { error: String },
    UpstreamError(ApiError),
    Unclassified,
    CallbackFailed { category: String, error: String },
    RequestThrottled { endpoint: String, delay: Duration },
}

/// Cloneable publisher side of the diagnostics channel.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    tx: broadcast::Sender<Diagnostic>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, diagnostic: Diagnostic) {
        // No receivers is the normal case in production.
        let _ = self.tx.send(diagnostic);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }
}
