//! Local subscription bookkeeping and the subscribe frames that mirror it upstream.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Result, TornError};
use crate::types::{EventCategory, SubscribeMessage, SubscriptionId};
use crate::websocket::dispatcher::{CallbackRegistry, EventCallback, Listeners, Removal};
use log::*;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::protocol::Message;

/// Outbound half of the currently open socket.
#[derive(Clone)]
pub(crate) struct LiveSocket {
    tx: mpsc::Sender<Message>,
    api_key: String,
}

impl LiveSocket {
    pub(crate) fn new(tx: mpsc::Sender<Message>, api_key: String) -> Self {
        Self { tx, api_key }
    }

    pub(crate) async fn send_subscribe(&self, events: &[EventCategory]) -> Result<()> {
        let msg_str = serde_json::to_string(&SubscribeMessage::new(&self.api_key, events))?;
        self.tx
            .send(Message::Text(msg_str))
            .await
            .map_err(|e| TornError::WebsocketError(format!("Failed to send message: {}", e)))
    }

    /// Best effort: skipped when the writer is backed up, since the socket
    /// tasks are aborted right after.
    pub(crate) fn close(&self) {
        if let Err(e) = self.tx.try_send(Message::Close(None)) {
            debug!("[Subscriptions] Close frame not queued: {}", e);
        }
    }
}

#[derive(Default)]
struct RegistryState {
    callbacks: CallbackRegistry,
    /// Push categories with at least one callback; sent whole on every (re)connect.
    subscribed: BTreeSet<EventCategory>,
}

pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    live: Mutex<Option<LiveSocket>>,
    diagnostics: Diagnostics,
}

impl SubscriptionRegistry {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            live: Mutex::new(None),
            diagnostics,
        }
    }

    /// Registers `callback` under `category` (appending, never replacing).
    ///
    /// A push category seen for the first time is subscribed on the live
    /// socket right away; without a socket it waits for the next resubscription.
    pub async fn subscribe(&self, category: &str, callback: EventCallback) -> Result<SubscriptionId> {
        let category = category.trim();
        if category.is_empty() {
            return Err(TornError::required("category"));
        }

        let mut state = self.state.write().await;
        let id = state.callbacks.insert(category, callback);

        let Ok(event) = category.parse::<EventCategory>() else {
            debug!("[Subscriptions] '{}' registered as a local-only listener", category);
            return Ok(id);
        };
        if !state.subscribed.insert(event) {
            return Ok(id);
        }

        match self.live.lock().await.as_ref() {
            Some(socket) => match socket.send_subscribe(&[event]).await {
                Ok(()) => {
                    info!("[Subscriptions] Subscribed to '{}'", event);
                    self.diagnostics.emit(Diagnostic::Subscribed {
                        events: vec![event],
                    });
                }
                Err(e) => warn!(
                    "[Subscriptions] Subscribe for '{}' not sent: {}. Will resend on reconnect.",
                    event, e
                ),
            },
            None => debug!(
                "[Subscriptions] Not connected; '{}' will be sent on next connect",
                event
            ),
        }
        Ok(id)
    }

    /// Removes one callback, or every callback of `category` when `id` is `None`.
    ///
    /// Local only: nothing is sent upstream. Returns whether anything was removed.
    pub async fn unsubscribe(&self, category: &str, id: Option<SubscriptionId>) -> bool {
        let category = category.trim();
        let mut state = self.state.write().await;
        match state.callbacks.remove(category, id) {
            Removal::NotFound => false,
            Removal::Removed => true,
            Removal::CategoryEmptied => {
                if let Ok(event) = category.parse::<EventCategory>() {
                    state.subscribed.remove(&event);
                }
                info!("[Subscriptions] Removed all listeners for '{}'", category);
                true
            }
        }
    }

    /// Publishes a freshly opened socket and resends the whole subscription set on it.
    ///
    /// Holds the registry lock for the duration so a concurrent `subscribe`
    /// either lands in this frame or sees the live socket, never neither.
    pub(crate) async fn attach(&self, socket: LiveSocket) -> Vec<EventCategory> {
        let state = self.state.write().await;
        let mut live = self.live.lock().await;
        let events: Vec<EventCategory> = state.subscribed.iter().copied().collect();
        if !events.is_empty() {
            info!("[Subscriptions] Resubscribing to {} categories...", events.len());
            match socket.send_subscribe(&events).await {
                Ok(()) => self.diagnostics.emit(Diagnostic::Subscribed {
                    events: events.clone(),
                }),
                Err(e) => error!("[Subscriptions] Failed to send resubscription: {}", e),
            }
        }
        *live = Some(socket);
        events
    }

    /// Forgets the socket; returns it so the caller can close it.
    pub(crate) async fn detach(&self) -> Option<LiveSocket> {
        self.live.lock().await.take()
    }

    pub async fn is_live(&self) -> bool {
        self.live.lock().await.is_some()
    }

    pub async fn subscribed(&self) -> Vec<EventCategory> {
        self.state.read().await.subscribed.iter().copied().collect()
    }

    pub async fn listeners(&self, category: EventCategory) -> Listeners {
        self.state.read().await.callbacks.listeners(category)
    }

    pub async fn listener_counts(&self) -> BTreeMap<String, usize> {
        self.state
            .read()
            .await
            .callbacks
            .counts()
            .map(|(category, count)| (category.to_string(), count))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;

    fn noop() -> EventCallback {
        Arc::new(|_: &Value| -> anyhow::Result<()> { Ok(()) })
    }

    #[tokio::test]
    async fn test_subscribe_rejects_empty_category() {
        let registry = SubscriptionRegistry::new(Diagnostics::new(8));
        let result = registry.subscribe("  ", noop()).await;
        assert!(matches!(result, Err(TornError::ParameterRequiredError { .. })));
    }

    #[tokio::test]
    async fn test_offline_subscribe_is_local_bookkeeping() {
        let registry = SubscriptionRegistry::new(Diagnostics::new(8));
        registry.subscribe("trades", noop()).await.unwrap();
        registry.subscribe("chain", noop()).await.unwrap();
        registry.subscribe("chain", noop()).await.unwrap();
        registry.subscribe("all", noop()).await.unwrap();

        assert_eq!(
            registry.subscribed().await,
            vec![EventCategory::Chain, EventCategory::Trades]
        );
        let counts = registry.listener_counts().await;
        assert_eq!(counts.get("chain"), Some(&2));
        assert_eq!(counts.get("all"), Some(&1));
    }

    #[tokio::test]
    async fn test_last_callback_removal_drops_category() {
        let registry = SubscriptionRegistry::new(Diagnostics::new(8));
        let first = registry.subscribe("attacks", noop()).await.unwrap();
        let second = registry.subscribe("attacks", noop()).await.unwrap();

        assert!(registry.unsubscribe("attacks", Some(first)).await);
        assert_eq!(registry.subscribed().await, vec![EventCategory::Attacks]);

        assert!(registry.unsubscribe("attacks", Some(second)).await);
        assert!(registry.subscribed().await.is_empty());
        assert!(!registry.unsubscribe("attacks", None).await);
    }

    #[tokio::test]
    async fn test_unsubscribe_whole_category() {
        let registry = SubscriptionRegistry::new(Diagnostics::new(8));
        registry.subscribe("events", noop()).await.unwrap();
        registry.subscribe("events", noop()).await.unwrap();
        assert!(registry.unsubscribe("events", None).await);
        assert!(registry.subscribed().await.is_empty());
        assert!(registry.listener_counts().await.is_empty());
    }

    #[tokio::test]
    async fn test_attach_resends_whole_set_and_live_subscribe_sends_single() {
        let registry = SubscriptionRegistry::new(Diagnostics::new(8));
        registry.subscribe("faction", noop()).await.unwrap();
        registry.subscribe("chain", noop()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let sent = registry.attach(LiveSocket::new(tx, "k".to_string())).await;
        assert_eq!(sent, vec![EventCategory::Chain, EventCategory::Faction]);

        let Some(Message::Text(frame)) = rx.recv().await else {
            panic!("expected a subscribe frame");
        };
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["events"], serde_json::json!(["chain", "faction"]));
        assert_eq!(frame["key"], "k");

        // Already subscribed: no frame.
        registry.subscribe("chain", noop()).await.unwrap();
        // New category while live: single-category frame.
        registry.subscribe("messages", noop()).await.unwrap();
        let Some(Message::Text(frame)) = rx.recv().await else {
            panic!("expected a subscribe frame");
        };
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["events"], serde_json::json!(["messages"]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_never_waits_on_a_full_writer() {
        let (tx, mut rx) = mpsc::channel(1);
        let socket = LiveSocket::new(tx, "k".to_string());
        socket.close();
        assert!(matches!(rx.try_recv(), Ok(Message::Close(None))));

        socket.send_subscribe(&[EventCategory::Chain]).await.unwrap();
        socket.close();
        assert!(matches!(rx.try_recv(), Ok(Message::Text(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_detach_goes_offline() {
        let registry = SubscriptionRegistry::new(Diagnostics::new(8));
        let (tx, _rx) = mpsc::channel(8);
        registry.attach(LiveSocket::new(tx, "k".to_string())).await;
        assert!(registry.is_live().await);
        assert!(registry.detach().await.is_some());
        assert!(!registry.is_live().await);
        assert!(registry.detach().await.is_none());
    }
}
