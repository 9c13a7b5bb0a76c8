pub mod config;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod rest;
pub mod types;
pub mod websocket;
pub use config::GatewayConfig;
pub use diagnostics::Diagnostic;
pub use error::{Result, TornError};
pub use gateway::{initialize, Gateway};
pub use types::{ApiError, ConnectionStatus, EventCategory, SubscriptionId};
