use crate::error::TornError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reserved category name for listeners that receive every classified event.
pub const ALL_EVENTS: &str = "all";

// --- Enums ---

/// Push event categories, declared in priority order.
///
/// The derived `Ord` follows declaration order, so sorting a set of
/// categories yields chain first and trades last. Classification of inbound
/// payloads checks keys in the same order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Chain,
    Attacks,
    Events,
    Faction,
    Messages,
    Trades,
}

impl EventCategory {
    /// Every category, highest priority first.
    pub const ALL: [EventCategory; 6] = [
        EventCategory::Chain,
        EventCategory::Attacks,
        EventCategory::Events,
        EventCategory::Faction,
        EventCategory::Messages,
        EventCategory::Trades,
    ];

    /// Wire name of the category, which is also the payload key that identifies it.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Chain => "chain",
            EventCategory::Attacks => "attacks",
            EventCategory::Events => "events",
            EventCategory::Faction => "faction",
            EventCategory::Messages => "messages",
            EventCategory::Trades => "trades",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = TornError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TornError::ParameterValueError {
                param: "category".to_string(),
                value: s.to_string(),
                allowed: EventCategory::ALL
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect(),
            })
    }
}

// --- Upstream payloads ---

/// Error object reported by the upstream API, e.g. `{"code": 2, "error": "Incorrect key"}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub error: String,
}

impl ApiError {
    /// Builds an `ApiError` from whatever the upstream put under `error`.
    ///
    /// The documented shape is an object with `code` and `error`; a bare
    /// string is kept as the message and anything else is stringified.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|_| ApiError {
                code: 0,
                error: value.to_string(),
            }),
            Value::String(s) => ApiError {
                code: 0,
                error: s.clone(),
            },
            other => ApiError {
                code: 0,
                error: other.to_string(),
            },
        }
    }
}

/// Subscribe frame sent over the socket.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SubscribeMessage<'a> {
    pub action: &'static str,
    pub key: &'a str,
    pub events: &'a [EventCategory],
}

impl<'a> SubscribeMessage<'a> {
    pub fn new(key: &'a str, events: &'a [EventCategory]) -> Self {
        Self {
            action: "subscribe",
            key,
            events,
        }
    }
}

/// Handle returned by a callback registration, used to remove that callback later.
pub type SubscriptionId = Uuid;

// --- Status ---

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct WebsocketStatus {
    pub connected: bool,
    pub reconnect_attempts: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub websocket: WebsocketStatus,
    /// Categories included in the next (re)subscription, in priority order.
    pub subscriptions: Vec<EventCategory>,
    /// Number of registered callbacks per category name.
    pub listeners: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_order_matches_priority() {
        let mut shuffled = vec![
            EventCategory::Trades,
            EventCategory::Faction,
            EventCategory::Chain,
            EventCategory::Messages,
            EventCategory::Attacks,
            EventCategory::Events,
        ];
        shuffled.sort();
        assert_eq!(shuffled, EventCategory::ALL.to_vec());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("chain".parse::<EventCategory>().unwrap(), EventCategory::Chain);
        assert_eq!("trades".parse::<EventCategory>().unwrap(), EventCategory::Trades);
        let err = "all".parse::<EventCategory>().unwrap_err();
        assert!(matches!(err, TornError::ParameterValueError { .. }));
    }

    #[test]
    fn test_api_error_from_object() {
        let err = ApiError::from_value(&json!({"code": 2, "error": "Incorrect key"}));
        assert_eq!(err.code, 2);
        assert_eq!(err.error, "Incorrect key");
    }

    #[test]
    fn test_api_error_from_string() {
        let err = ApiError::from_value(&json!("Too many requests"));
        assert_eq!(err.code, 0);
        assert_eq!(err.error, "Too many requests");
    }

    #[test]
    fn test_subscribe_message_shape() {
        let events = [EventCategory::Chain, EventCategory::Attacks];
        let msg = serde_json::to_value(SubscribeMessage::new("abc", &events)).unwrap();
        assert_eq!(
            msg,
            json!({"action": "subscribe", "key": "abc", "events": ["chain", "attacks"]})
        );
    }
}
