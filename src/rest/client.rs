use crate::config::{GatewayConfig, RateLimits};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Result, TornError};
use crate::rest::rate_limit::{RateLimitLedger, Slot};
use crate::types::ApiError;
use chrono::Utc;
use log::*;
use reqwest::{Client as HttpClient, Response};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::sleep;
use url::Url;

/// Pull-path client for the Torn REST API.
///
/// Independent of the socket: it keeps working while the push path is down.
/// Requests to one endpoint are spaced by that endpoint's minimum interval;
/// early requests are delayed, never dropped.
///
/// # Examples
///
/// ```no_run
/// use torn_gateway::rest::Client;
/// use torn_gateway::GatewayConfig;
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::new(&GatewayConfig::default()).expect("Failed to create client");
///     let faction = client
///         .fetch_data("faction", Some("basic"), "your_api_key", &[], false)
///         .await
///         .expect("Failed to fetch");
///     println!("Faction: {}", faction["name"]);
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    /// The underlying HTTP client; carries the request timeout.
    http_client: HttpClient,
    /// Base URL, always ending in `/` so endpoints join beneath it.
    base_url: Url,
    rate_limits: RateLimits,
    ledger: Arc<RateLimitLedger>,
    diagnostics: Diagnostics,
}

impl Client {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Self::with_diagnostics(config, Diagnostics::new(config.diagnostics_capacity))
    }

    pub(crate) fn with_diagnostics(config: &GatewayConfig, diagnostics: Diagnostics) -> Result<Self> {
        let mut base = config.rest_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            rate_limits: config.rate_limits.clone(),
            ledger: Arc::new(RateLimitLedger::new()),
            diagnostics,
        })
    }

    /// `{base}/{endpoint}/?selections=..&{extra}&key=..`
    fn build_url(
        &self,
        endpoint: &str,
        selections: Option<&str>,
        api_key: &str,
        extra_params: &[(&str, &str)],
    ) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("{}/", endpoint.trim_matches('/')))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(selections) = selections.filter(|s| !s.is_empty()) {
                query.append_pair("selections", selections);
            }
            for (name, value) in extra_params {
                query.append_pair(name, value);
            }
            query.append_pair("key", api_key);
        }
        Ok(url)
    }

    /// Fetches `endpoint` with the given comma-separated `selections`.
    ///
    /// A non-priority call that arrives inside the endpoint's window waits for
    /// its reserved slot and then goes out as a priority request; the caller
    /// only sees a later result. Fails on transport errors, non-2xx statuses,
    /// and bodies carrying an upstream `error` object
    /// ([`TornError::ApiError`]). Successful bodies gain `lastUpdate` and
    /// `source: "http"`.
    pub async fn fetch_data(
        &self,
        endpoint: &str,
        selections: Option<&str>,
        api_key: &str,
        extra_params: &[(&str, &str)],
        priority: bool,
    ) -> Result<Value> {
        if endpoint.trim_matches('/').is_empty() {
            return Err(TornError::required("endpoint"));
        }
        if api_key.is_empty() {
            return Err(TornError::required("api_key"));
        }
        let url = self.build_url(endpoint, selections, api_key, extra_params)?;
        let interval = self.rate_limits.interval_for(endpoint);

        if let Slot::After(delay) = self.ledger.acquire(endpoint, interval, priority).await {
            debug!(
                "[Http] Rate limit for '{}': delaying request by {:?}",
                endpoint, delay
            );
            self.diagnostics.emit(Diagnostic::RequestThrottled {
                endpoint: endpoint.to_string(),
                delay,
            });
            sleep(delay).await;
        }

        debug!("[Http] GET /{}/ selections={:?}", endpoint.trim_matches('/'), selections);
        let request = self.http_client.get(url).build()?;
        let response = self.http_client.execute(request).await?;
        Self::handle_response(response).await
    }

    /// Status and `error` handling shared by every request.
    async fn handle_response(response: Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        // The upstream reports failures in-body, often with a 200.
        if let Some(error) = body
            .as_ref()
            .and_then(|b| b.get("error"))
            .filter(|e| !e.is_null())
        {
            let api_error = ApiError::from_value(error);
            warn!(
                "[Http] Upstream error: code={}, message={}",
                api_error.code, api_error.error
            );
            return Err(TornError::ApiError(api_error));
        }

        if !status.is_success() {
            return Err(TornError::HttpStatusError { status, body: text });
        }

        let mut body = match body {
            Some(body) => body,
            None => serde_json::from_str::<Value>(&text)?,
        };
        if let Some(object) = body.as_object_mut() {
            object.insert("lastUpdate".to_string(), json!(Utc::now().timestamp_millis()));
            object.insert("source".to_string(), json!("http"));
        }
        Ok(body)
    }

    // --- Section helpers ---

    /// GET /user/{id}. `None` resolves to the key owner.
    pub async fn get_user(&self, api_key: &str, id: Option<u64>, selections: &str) -> Result<Value> {
        let endpoint = scoped("user", id);
        self.fetch_data(&endpoint, Some(selections), api_key, &[], false)
            .await
    }

    /// GET /faction/{id}. `None` resolves to the key owner's faction.
    pub async fn get_faction(
        &self,
        api_key: &str,
        id: Option<u64>,
        selections: &str,
    ) -> Result<Value> {
        let endpoint = scoped("faction", id);
        self.fetch_data(&endpoint, Some(selections), api_key, &[], false)
            .await
    }

    /// GET /torn for game-wide data (items, stocks, ...).
    pub async fn get_torn(&self, api_key: &str, selections: &str) -> Result<Value> {
        self.fetch_data("torn", Some(selections), api_key, &[], false)
            .await
    }

    /// GET /market/{item_id}.
    pub async fn get_market(&self, api_key: &str, item_id: u64, selections: &str) -> Result<Value> {
        let endpoint = scoped("market", Some(item_id));
        self.fetch_data(&endpoint, Some(selections), api_key, &[], false)
            .await
    }
}

fn scoped(section: &str, id: Option<u64>) -> String {
    match id {
        Some(id) => format!("{}/{}", section, id),
        None => section.to_string(),
    }
}
