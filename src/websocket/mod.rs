//! Push path of the gateway: the WebSocket connection and everything hanging off it.
//!
//! - [`ConnectionManager`]: owns the socket, reconnects with bounded
//!   exponential backoff and runs the periodic health check
//! - [`SubscriptionRegistry`]: callbacks per category and the set of
//!   categories subscribed upstream
//! - [`EventDispatcher`]: classifies each inbound frame and fans it out
//!
//! # Reconnection Behavior
//!
//! - Close or failed connect: reconnect after `base * 2^n` (5s, 10s, 20s by default)
//! - After the last attempt no further reconnect is scheduled; the health
//!   check (60s by default) restarts the cycle while the socket stays down
//! - Every successful connect resends the whole subscription set in one frame
//!
//! # Message Handling
//!
//! Frames are dispatched one at a time in receipt order. Callbacks for the
//! event's category run first, then the `"all"` callbacks. A callback that
//! returns an error or panics is logged and skipped; the rest still run.
//! Callbacks run on the reader task and should return quickly.
//!
//! ```no_run
//! use torn_gateway::{Gateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::initialize("your_api_key", GatewayConfig::default())
//!         .await
//!         .expect("Failed to initialize");
//!
//!     gateway
//!         .subscribe_to_event("chain", |payload| {
//!             println!("Chain update: {}", payload["chain"]);
//!             Ok(())
//!         })
//!         .await
//!         .expect("Failed to subscribe");
//!
//!     tokio::signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
//!     gateway.shutdown().await;
//! }
//! ```

pub mod client;
pub mod dispatcher;
pub mod subscriptions;

pub use client::{ConnectionManager, ReconnectState};
pub use dispatcher::{classify, decode, Classified, EventCallback, EventDispatcher};
pub use subscriptions::SubscriptionRegistry;
