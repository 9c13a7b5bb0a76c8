use crate::config::endpoint_root;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Outcome of asking the ledger for a request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Dispatch now; the ledger already records it.
    Now,
    /// Dispatch after this delay; the slot is reserved for that instant.
    After(Duration),
}

/// Last (or next reserved) dispatch instant per API section.
///
/// Keyed by [`endpoint_root`], so `user/1` and `user/2` share one window.
#[derive(Debug, Default)]
pub struct RateLimitLedger {
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, endpoint: &str, interval: Duration, priority: bool) -> Slot {
        self.acquire_at(endpoint, interval, priority, Instant::now())
            .await
    }

    /// Checks and records under one lock, so two callers can never both pass the check.
    ///
    /// A non-priority request inside the window reserves `last + interval`
    /// and is told to wait until then; the next early caller queues behind
    /// that reservation. Priority requests skip the check and never move a
    /// reservation backwards.
    pub async fn acquire_at(
        &self,
        endpoint: &str,
        interval: Duration,
        priority: bool,
        now: Instant,
    ) -> Slot {
        let mut ledger = self.last_request.lock().await;
        let key = endpoint_root(endpoint);

        let last = ledger.get(&key).copied();
        if let Some(last) = last {
            let ready_at = last + interval;
            if !priority && ready_at > now {
                ledger.insert(key, ready_at);
                return Slot::After(ready_at - now);
            }
        }

        let stamp = match last {
            Some(last) if last > now => last,
            _ => now,
        };
        ledger.insert(key, stamp);
        Slot::Now
    }

    pub async fn last_request(&self, endpoint: &str) -> Option<Instant> {
        self.last_request
            .lock()
            .await
            .get(&endpoint_root(endpoint))
            .copied()
    }
}
