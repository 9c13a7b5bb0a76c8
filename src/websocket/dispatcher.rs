//! Classification of inbound socket messages and fan-out to callbacks.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::types::{ApiError, EventCategory, SubscriptionId, ALL_EVENTS};
use crate::websocket::subscriptions::SubscriptionRegistry;
use chrono::Utc;
use log::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Subscriber callback. An `Err` or a panic is logged and isolated.
pub type EventCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static>;

/// Result of decoding one text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Event {
        category: EventCategory,
        payload: Value,
    },
    UpstreamError(ApiError),
    Unclassified,
    Malformed(String),
}

/// First category whose key is present in `payload`, checked in priority order.
pub fn classify(payload: &Value) -> Option<EventCategory> {
    EventCategory::ALL
        .iter()
        .copied()
        .find(|category| payload.get(category.as_str()).is_some())
}

/// Decodes a text frame and stamps classified payloads with `lastUpdate`.
pub fn decode(text: &str, received_at_ms: i64) -> Classified {
    let mut payload: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Classified::Malformed(e.to_string()),
    };

    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        return Classified::UpstreamError(ApiError::from_value(error));
    }

    let Some(category) = classify(&payload) else {
        return Classified::Unclassified;
    };

    if let Some(object) = payload.as_object_mut() {
        object.insert("lastUpdate".to_string(), json!(received_at_ms));
    }
    Classified::Event { category, payload }
}

/// Ordered callbacks per category name, including [`ALL_EVENTS`].
#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<String, Vec<(SubscriptionId, EventCallback)>>,
}

impl CallbackRegistry {
    /// Appends a callback and returns its id.
    pub fn insert(&mut self, category: &str, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId::new_v4();
        self.entries
            .entry(category.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    /// Removes one callback, or the whole category when `id` is `None`.
    pub fn remove(&mut self, category: &str, id: Option<SubscriptionId>) -> Removal {
        let Some(list) = self.entries.get_mut(category) else {
            return Removal::NotFound;
        };
        match id {
            Some(id) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                if list.len() == before {
                    return Removal::NotFound;
                }
                if list.is_empty() {
                    self.entries.remove(category);
                    Removal::CategoryEmptied
                } else {
                    Removal::Removed
                }
            }
            None => {
                self.entries.remove(category);
                Removal::CategoryEmptied
            }
        }
    }

    pub fn contains(&self, category: &str) -> bool {
        self.entries.contains_key(category)
    }

    pub fn counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries
            .iter()
            .map(|(category, list)| (category.as_str(), list.len()))
    }

    /// Snapshot of the callbacks interested in `category`, so none are invoked under a lock.
    pub fn listeners(&self, category: EventCategory) -> Listeners {
        let collect = |name: &str| -> Vec<EventCallback> {
            self.entries
                .get(name)
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        Listeners {
            category,
            specific: collect(category.as_str()),
            all: collect(ALL_EVENTS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    NotFound,
    Removed,
    CategoryEmptied,
}

pub struct Listeners {
    category: EventCategory,
    specific: Vec<EventCallback>,
    all: Vec<EventCallback>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

impl Listeners {
    pub fn is_empty(&self) -> bool {
        self.specific.is_empty() && self.all.is_empty()
    }

    /// Invokes category callbacks, then `all` callbacks, each in registration order.
    pub fn dispatch(&self, payload: &Value, diagnostics: &Diagnostics) -> DispatchReport {
        let mut report = DispatchReport::default();
        let groups = [
            (self.category.as_str(), &self.specific),
            (ALL_EVENTS, &self.all),
        ];
        for (label, callbacks) in groups {
            for callback in callbacks.iter() {
                match invoke(callback, payload) {
                    Ok(()) => report.delivered += 1,
                    Err(error) => {
                        report.failed += 1;
                        error!(
                            "[Dispatch] '{}' callback failed on {} event: {}",
                            label, self.category, error
                        );
                        diagnostics.emit(Diagnostic::CallbackFailed {
                            category: label.to_string(),
                            error,
                        });
                    }
                }
            }
        }
        report
    }
}

/// Turns inbound text frames into callback invocations.
///
/// Owned by the socket reader task, which awaits each message before
/// reading the next, so dispatch order equals receipt order.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<SubscriptionRegistry>,
    diagnostics: Diagnostics,
}

impl EventDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, diagnostics: Diagnostics) -> Self {
        Self {
            registry,
            diagnostics,
        }
    }

    pub async fn handle_text(&self, text: &str) -> DispatchReport {
        match decode(text, Utc::now().timestamp_millis()) {
            Classified::Event { category, payload } => {
                let listeners = self.registry.listeners(category).await;
                if listeners.is_empty() {
                    trace!("[Dispatch] No listeners for {} event", category);
                    return DispatchReport::default();
                }
                listeners.dispatch(&payload, &self.diagnostics)
            }
            Classified::UpstreamError(api_error) => {
                error!(
                    "[Dispatch] Upstream error on socket: code={}, message={}",
                    api_error.code, api_error.error
                );
                self.diagnostics.emit(Diagnostic::UpstreamError(api_error));
                DispatchReport::default()
            }
            Classified::Malformed(error) => {
                error!("[Dispatch] Discarding malformed message: {}", error);
                self.diagnostics.emit(Diagnostic::MalformedPayload { error });
                DispatchReport::default()
            }
            Classified::Unclassified => {
                debug!("[Dispatch] Dropping unclassified message");
                self.diagnostics.emit(Diagnostic::Unclassified);
                DispatchReport::default()
            }
        }
    }
}

fn invoke(callback: &EventCallback, payload: &Value) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "callback panicked".to_string())),
    }
}
