use crate::config::GatewayConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Result, TornError};
use crate::types::WebsocketStatus;
use crate::websocket::dispatcher::EventDispatcher;
use crate::websocket::subscriptions::{LiveSocket, SubscriptionRegistry};
use futures_util::{SinkExt, StreamExt};
use log::*;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

/// Connection flag and reconnect budget.
///
/// Mutated only by the supervisor (open/close) and the health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub connected: bool,
    pub reconnect_attempts: u32,
}

impl ReconnectState {
    pub fn on_open(&mut self) {
        self.connected = true;
        self.reconnect_attempts = 0;
    }

    /// Records a close and decides the next reconnect.
    ///
    /// Returns the 1-based attempt number and its delay, or `None` once the
    /// budget is spent. The counter is bumped before the delay is handed out.
    pub fn on_close(&mut self, config: &GatewayConfig) -> Option<(u32, Duration)> {
        self.connected = false;
        if self.reconnect_attempts >= config.max_reconnect_attempts {
            return None;
        }
        let delay = config.reconnect_delay(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        Some((self.reconnect_attempts, delay))
    }

    /// Returns `true` when a new connect cycle should start, resetting the budget.
    pub fn on_health_check(&mut self) -> bool {
        if self.connected {
            return false;
        }
        self.reconnect_attempts = 0;
        true
    }
}

/// `url` with the API key appended as the `key` query parameter.
fn keyed_url(url: &Url, api_key: &str) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("key", api_key);
    url
}

/// Tasks backing one open socket.
struct ManagedSocket {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    tx: mpsc::Sender<Message>,
}

/// URL without the query string, so the API key stays out of logs.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

/// Opens the socket and spawns its reader and writer tasks.
///
/// The reader answers pings through the writer channel and hands every text
/// frame to the dispatcher, awaiting each before reading the next. The reader
/// finishing is the single signal that the connection is gone.
async fn connect_managed(url: &Url, dispatcher: EventDispatcher) -> Result<ManagedSocket> {
    info!("Connecting to WebSocket: {}", redacted(url));
    let (ws_stream, response) = connect_async(url.as_str())
        .await
        .map_err(|e| TornError::WebsocketError(format!("WebSocket connection failed: {}", e)))?;
    info!(
        "WebSocket connected successfully. Response: {:?}",
        response.status()
    );

    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::channel::<Message>(32);
    let tx_clone_for_ping = tx.clone();

    // --- Writer Task ---
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = write.send(message).await {
                error!("WebSocket send error: {}. Stopping writer task.", e);
                break;
            }
            if closing {
                break;
            }
        }
        info!("WebSocket writer task finished.");
    });

    // --- Reader Task ---
    let reader = tokio::spawn(async move {
        loop {
            match read.next().await {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        trace!("Received WS Text: {}", text);
                        dispatcher.handle_text(&text).await;
                    }
                    Message::Binary(bin) => {
                        trace!("Received WS Binary ({} bytes), ignoring", bin.len());
                    }
                    Message::Ping(ping_data) => {
                        trace!("Received WS Ping, sending Pong via channel");
                        if tx_clone_for_ping
                            .send(Message::Pong(ping_data))
                            .await
                            .is_err()
                        {
                            error!("Failed to send Pong: writer channel closed.");
                            break;
                        }
                    }
                    Message::Pong(_) => {
                        trace!("Received WS Pong");
                    }
                    Message::Close(close_frame) => {
                        warn!("Received WS Close frame: {:?}", close_frame);
                        break;
                    }
                    Message::Frame(_) => {}
                },
                Some(Err(e)) => {
                    // Logged only; the loop ending below is what marks the socket closed.
                    error!("WebSocket read error: {}", e);
                    break;
                }
                None => {
                    info!("WebSocket stream ended (read None).");
                    break;
                }
            }
        }
        info!("WebSocket reader task finished.");
    });

    Ok(ManagedSocket { reader, writer, tx })
}

/// Owns the socket lifecycle: connect, resubscribe, backoff, health check.
///
/// Every timer lives inside a task whose handle is stored here, so
/// [`reset`](Self::reset) and [`shutdown`](Self::shutdown) cancel all of them
/// and no stale backoff can open a second socket.
pub struct ConnectionManager {
    config: GatewayConfig,
    ws_url: Url,
    api_key: Mutex<String>,
    state: Mutex<ReconnectState>,
    // Connect/backoff loop for the current cycle.
    supervisor: Mutex<Option<JoinHandle<()>>>,
    health_check: Mutex<Option<JoinHandle<()>>>,
    // Reader/writer of the open socket. Written without awaiting so an abort
    // of the supervisor can never strand a socket.
    socket_tasks: StdMutex<Vec<AbortHandle>>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: EventDispatcher,
    diagnostics: Diagnostics,
}

impl ConnectionManager {
    pub fn new(
        config: GatewayConfig,
        api_key: String,
        registry: Arc<SubscriptionRegistry>,
        diagnostics: Diagnostics,
    ) -> Result<Arc<Self>> {
        if api_key.trim().is_empty() {
            return Err(TornError::required("api_key"));
        }
        let ws_url = Url::parse(&config.ws_url)?;
        let dispatcher = EventDispatcher::new(Arc::clone(&registry), diagnostics.clone());
        Ok(Arc::new(Self {
            config,
            ws_url,
            api_key: Mutex::new(api_key),
            state: Mutex::new(ReconnectState::default()),
            supervisor: Mutex::new(None),
            health_check: Mutex::new(None),
            socket_tasks: StdMutex::new(Vec::new()),
            registry,
            dispatcher,
            diagnostics,
        }))
    }

    /// Starts the first connect cycle and the periodic health check.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.connect(None).await?;
        self.spawn_health_check().await;
        Ok(())
    }

    /// Tears everything down and starts over with a full retry budget.
    ///
    /// Registered callbacks and the subscription set are kept and resent on
    /// the new socket.
    pub async fn reset(self: &Arc<Self>, api_key: Option<String>) -> Result<()> {
        info!("[Manager] Resetting connection...");
        self.stop_health_check().await;
        self.connect(api_key).await?;
        self.spawn_health_check().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Stopping WebSocket client...");
        self.stop_health_check().await;
        let mut supervisor = self.supervisor.lock().await;
        self.teardown(&mut supervisor).await;
        info!("Stop signal sent.");
    }

    pub async fn status(&self) -> WebsocketStatus {
        let state = *self.state.lock().await;
        WebsocketStatus {
            connected: state.connected,
            reconnect_attempts: state.reconnect_attempts,
        }
    }

    pub async fn api_key(&self) -> String {
        self.api_key.lock().await.clone()
    }

    /// Force-closes any previous socket, then launches a new connect cycle.
    async fn connect(self: &Arc<Self>, api_key: Option<String>) -> Result<()> {
        if let Some(api_key) = api_key {
            if api_key.trim().is_empty() {
                return Err(TornError::required("api_key"));
            }
            *self.api_key.lock().await = api_key;
        }

        let mut supervisor = self.supervisor.lock().await;
        self.teardown(&mut supervisor).await;
        *self.state.lock().await = ReconnectState::default();
        *supervisor = Some(tokio::spawn(Arc::clone(self).supervise()));
        Ok(())
    }

    /// Idempotent: safe to call with nothing open.
    async fn teardown(&self, supervisor: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = supervisor.take() {
            handle.abort();
            // Wait until the cycle is really gone; it may be mid-poll on another worker.
            let _ = handle.await;
        }
        if let Some(socket) = self.registry.detach().await {
            socket.close();
        }
        let tasks = std::mem::take(
            &mut *self.socket_tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        self.state.lock().await.connected = false;
    }

    fn track_socket(&self, tasks: Vec<AbortHandle>) {
        *self.socket_tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks;
    }

    async fn connect_url(&self) -> Url {
        let api_key = self.api_key.lock().await.clone();
        keyed_url(&self.ws_url, &api_key)
    }

    /// One connect cycle: connect, serve until closed, back off, repeat until
    /// the attempt budget is spent.
    async fn supervise(self: Arc<Self>) {
        loop {
            let url = self.connect_url().await;
            let attempt = self.state.lock().await.reconnect_attempts;
            info!("[Manager] Attempting connection (Retry {})...", attempt);

            match connect_managed(&url, self.dispatcher.clone()).await {
                Ok(ManagedSocket { reader, writer, tx }) => {
                    self.track_socket(vec![reader.abort_handle(), writer.abort_handle()]);
                    info!("[Manager] Connection established successfully.");
                    self.state.lock().await.on_open();
                    self.diagnostics.emit(Diagnostic::Connected);

                    let api_key = self.api_key.lock().await.clone();
                    self.registry.attach(LiveSocket::new(tx, api_key)).await;

                    if let Err(e) = reader.await {
                        if !e.is_cancelled() {
                            error!("[Manager] Connection task panicked: {}", e);
                        }
                    }
                    info!("[Manager] Connection task ended.");
                    self.registry.detach().await;
                    writer.abort();
                    self.track_socket(Vec::new());
                }
                Err(e) => {
                    error!("[Manager] Failed to establish connection: {}", e);
                    self.diagnostics.emit(Diagnostic::ConnectFailed {
                        error: e.to_string(),
                    });
                }
            }

            let (attempts, next) = {
                let mut state = self.state.lock().await;
                let attempts = state.reconnect_attempts;
                (attempts, state.on_close(&self.config))
            };
            self.diagnostics.emit(Diagnostic::Disconnected {
                reconnect_attempts: attempts,
            });

            match next {
                Some((attempt, delay)) => {
                    warn!(
                        "[Manager] Disconnected. Reconnect {}/{} in {:?}...",
                        attempt, self.config.max_reconnect_attempts, delay
                    );
                    self.diagnostics
                        .emit(Diagnostic::ReconnectScheduled { attempt, delay });
                    sleep(delay).await;
                }
                None => {
                    warn!(
                        "[Manager] Max reconnect attempts ({}) reached. Relying on HTTP fallback until the health check reconnects.",
                        attempts
                    );
                    self.diagnostics
                        .emit(Diagnostic::ReconnectExhausted { attempts });
                    break;
                }
            }
        }
        info!("[Manager] Task finished.");
    }

    /// Restarts the connect cycle if the socket is down and nothing is in flight.
    ///
    /// Returns whether a new cycle was started.
    pub async fn health_check(self: &Arc<Self>) -> bool {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            trace!("[Health] Connect cycle in flight, nothing to do");
            return false;
        }
        if !self.state.lock().await.on_health_check() {
            return false;
        }
        warn!("[Health] WebSocket disconnected. Starting a new connect cycle.");
        self.diagnostics.emit(Diagnostic::HealthCheckReconnect);
        *supervisor = Some(tokio::spawn(Arc::clone(self).supervise()));
        true
    }

    async fn spawn_health_check(self: &Arc<Self>) {
        let period = self.config.health_check_interval;
        let manager = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.health_check().await;
            }
        });
        if let Some(previous) = self.health_check.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn stop_health_check(&self) {
        if let Some(handle) = self.health_check.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_stops() {
        let config = GatewayConfig::default();
        let mut state = ReconnectState::default();
        state.on_open();

        let delays: Vec<_> = (0..4).map(|_| state.on_close(&config)).collect();
        assert_eq!(
            delays,
            vec![
                Some((1, Duration::from_secs(5))),
                Some((2, Duration::from_secs(10))),
                Some((3, Duration::from_secs(20))),
                None,
            ]
        );
        assert!(!state.connected);
        assert_eq!(state.reconnect_attempts, 3);
    }

    #[test]
    fn test_open_resets_budget() {
        let config = GatewayConfig::default();
        let mut state = ReconnectState::default();
        state.on_close(&config);
        state.on_close(&config);
        state.on_open();
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.on_close(&config), Some((1, Duration::from_secs(5))));
    }

    #[test]
    fn test_health_check_resets_exhausted_budget() {
        let config = GatewayConfig::default();
        let mut state = ReconnectState::default();
        while state.on_close(&config).is_some() {}
        assert_eq!(state.reconnect_attempts, config.max_reconnect_attempts);

        assert!(state.on_health_check());
        assert_eq!(state.reconnect_attempts, 0);
    }

    #[test]
    fn test_health_check_ignores_live_socket() {
        let mut state = ReconnectState::default();
        state.on_open();
        assert!(!state.on_health_check());
    }

    #[test]
    fn test_redacted_drops_key() {
        let url = Url::parse("wss://ws.torn.com/?key=secret").unwrap();
        assert_eq!(redacted(&url), "wss://ws.torn.com/");
    }

    #[test]
    fn test_keyed_url_appends_key() {
        let url = Url::parse("wss://ws.torn.com/").unwrap();
        assert_eq!(
            keyed_url(&url, "a b&c").as_str(),
            "wss://ws.torn.com/?key=a+b%26c"
        );
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_supervisor_future_is_send() {
        let diagnostics = Diagnostics::new(8);
        let registry = Arc::new(SubscriptionRegistry::new(diagnostics.clone()));
        let manager =
            ConnectionManager::new(GatewayConfig::default(), "k".into(), registry, diagnostics)
                .unwrap();
        let cycle = Arc::clone(&manager).supervise();
        assert_send(&cycle);
    }

    #[tokio::test]
    async fn test_new_rejects_empty_key() {
        let diagnostics = Diagnostics::new(8);
        let registry = Arc::new(SubscriptionRegistry::new(diagnostics.clone()));
        let result = ConnectionManager::new(GatewayConfig::default(), " ".into(), registry, diagnostics);
        assert!(matches!(result, Err(TornError::ParameterRequiredError { .. })));
    }
}
