use crate::config::GatewayConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::Result;
use crate::rest::Client;
use crate::types::{ConnectionStatus, SubscriptionId};
use crate::websocket::{ConnectionManager, SubscriptionRegistry};
use log::*;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Real-time data gateway: push events over the socket, pull queries over HTTP.
///
/// Cheap to clone; clones share one connection, registry and rate-limit ledger.
/// Several gateways (for example one per API key) can run side by side.
#[derive(Clone)]
pub struct Gateway {
    connection: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    http: Client,
    diagnostics: Diagnostics,
}

/// Builds a gateway and starts its connection and health check.
pub async fn initialize(api_key: impl Into<String>, config: GatewayConfig) -> Result<Gateway> {
    Gateway::initialize(api_key, config).await
}

impl Gateway {
    /// Builds a gateway without opening the socket. Call [`start`](Self::start) next.
    ///
    /// Useful to attach [`diagnostics`](Self::diagnostics) or callbacks before
    /// the first connect.
    pub fn new(api_key: impl Into<String>, config: GatewayConfig) -> Result<Self> {
        let diagnostics = Diagnostics::new(config.diagnostics_capacity);
        let registry = Arc::new(SubscriptionRegistry::new(diagnostics.clone()));
        let http = Client::with_diagnostics(&config, diagnostics.clone())?;
        let connection = ConnectionManager::new(
            config,
            api_key.into(),
            Arc::clone(&registry),
            diagnostics.clone(),
        )?;
        Ok(Self {
            connection,
            registry,
            http,
            diagnostics,
        })
    }

    /// Must be called within a tokio runtime.
    pub async fn start(&self) -> Result<()> {
        info!("Starting Torn gateway...");
        self.connection.start().await
    }

    pub async fn initialize(api_key: impl Into<String>, config: GatewayConfig) -> Result<Self> {
        let gateway = Self::new(api_key, config)?;
        gateway.start().await?;
        Ok(gateway)
    }

    /// Registers `callback` for `category` (`"chain"`, `"attacks"`, ..., or `"all"`).
    ///
    /// Only fails for an empty category. Keep the returned id to remove this
    /// callback alone later.
    pub async fn subscribe_to_event<F>(&self, category: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.subscribe(category, Arc::new(callback)).await
    }

    /// Removes one callback (`Some(id)`) or the whole category (`None`).
    pub async fn unsubscribe_from_event(&self, category: &str, id: Option<SubscriptionId>) -> bool {
        self.registry.unsubscribe(category, id).await
    }

    /// Rate-limited REST request using this gateway's API key.
    pub async fn fetch_data(
        &self,
        endpoint: &str,
        selections: Option<&str>,
        extra_params: &[(&str, &str)],
        priority: bool,
    ) -> Result<Value> {
        let api_key = self.connection.api_key().await;
        self.http
            .fetch_data(endpoint, selections, &api_key, extra_params, priority)
            .await
    }

    pub async fn get_user(&self, id: Option<u64>, selections: &str) -> Result<Value> {
        let api_key = self.connection.api_key().await;
        self.http.get_user(&api_key, id, selections).await
    }

    pub async fn get_faction(&self, id: Option<u64>, selections: &str) -> Result<Value> {
        let api_key = self.connection.api_key().await;
        self.http.get_faction(&api_key, id, selections).await
    }

    pub async fn get_torn(&self, selections: &str) -> Result<Value> {
        let api_key = self.connection.api_key().await;
        self.http.get_torn(&api_key, selections).await
    }

    pub async fn get_market(&self, item_id: u64, selections: &str) -> Result<Value> {
        let api_key = self.connection.api_key().await;
        self.http.get_market(&api_key, item_id, selections).await
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            websocket: self.connection.status().await,
            subscriptions: self.registry.subscribed().await,
            listeners: self.registry.listener_counts().await,
        }
    }

    /// Closes the socket, cancels every pending timer and reconnects from scratch,
    /// optionally with a new API key. Subscriptions survive.
    pub async fn reset_connection(&self, api_key: Option<String>) -> Result<()> {
        self.connection.reset(api_key).await
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Stops the socket and the health check. HTTP requests keep working.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}
