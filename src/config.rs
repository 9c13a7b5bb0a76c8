use std::env;
use std::time::Duration;

pub const DEFAULT_REST_URL: &str = "https://api.torn.com";
pub const DEFAULT_WS_URL: &str = "wss://ws.torn.com/";
const MAX_RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_BASE_DELAY_SECS: u64 = 5;
const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const DIAGNOSTICS_CAPACITY: usize = 256;

/// Rate-limit bucket an HTTP endpoint falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    Faction,
    User,
    Market,
    Torn,
    Default,
}

/// Lowercased first path segment: the API section an endpoint belongs to.
///
/// `faction/1234`, `/Faction/` and `faction` all map to `faction`.
pub fn endpoint_root(endpoint: &str) -> String {
    endpoint
        .trim_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

impl EndpointCategory {
    /// Buckets an endpoint by its section, so `faction/1234` counts as `faction`.
    pub fn for_endpoint(endpoint: &str) -> Self {
        match endpoint_root(endpoint).as_str() {
            "faction" => EndpointCategory::Faction,
            "user" => EndpointCategory::User,
            "market" => EndpointCategory::Market,
            "torn" => EndpointCategory::Torn,
            _ => EndpointCategory::Default,
        }
    }
}

/// Minimum spacing between two requests to the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    pub faction: Duration,
    pub user: Duration,
    pub market: Duration,
    pub torn: Duration,
    pub default: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            faction: Duration::from_secs(60),
            user: Duration::from_secs(30),
            market: Duration::from_secs(60),
            torn: Duration::from_secs(300),
            default: Duration::from_secs(10),
        }
    }
}

impl RateLimits {
    /// The same interval for every bucket. Handy for tests.
    pub fn uniform(interval: Duration) -> Self {
        Self {
            faction: interval,
            user: interval,
            market: interval,
            torn: interval,
            default: interval,
        }
    }

    pub fn interval_for(&self, endpoint: &str) -> Duration {
        match EndpointCategory::for_endpoint(endpoint) {
            EndpointCategory::Faction => self.faction,
            EndpointCategory::User => self.user,
            EndpointCategory::Market => self.market,
            EndpointCategory::Torn => self.torn,
            EndpointCategory::Default => self.default,
        }
    }
}

/// Settings for a [`Gateway`](crate::Gateway).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// REST base URL; endpoints are joined onto it.
    pub rest_url: String,
    /// WebSocket URL; the API key is appended as the `key` query parameter.
    pub ws_url: String,
    /// Automatic reconnects allowed after consecutive closes before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect; doubled for each further attempt.
    pub reconnect_base_delay: Duration,
    pub health_check_interval: Duration,
    pub request_timeout: Duration,
    pub rate_limits: RateLimits,
    /// Buffer size of the diagnostics broadcast channel.
    pub diagnostics_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rest_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_secs(RECONNECT_BASE_DELAY_SECS),
            health_check_interval: Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            rate_limits: RateLimits::default(),
            diagnostics_capacity: DIAGNOSTICS_CAPACITY,
        }
    }
}

impl GatewayConfig {
    /// Defaults, with the endpoints overridden by `TORN_REST_URL` and `TORN_WS_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(rest_url) = env::var("TORN_REST_URL") {
            config.rest_url = rest_url;
        }
        if let Ok(ws_url) = env::var("TORN_WS_URL") {
            config.ws_url = ws_url;
        }
        config
    }

    /// Backoff before reconnect number `attempt + 1`: `base * 2^attempt`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}
