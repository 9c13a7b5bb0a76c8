//! Pull path of the gateway: rate-limited REST requests.

pub mod client;
pub mod rate_limit;

pub use client::Client;
pub use rate_limit::{RateLimitLedger, Slot};
