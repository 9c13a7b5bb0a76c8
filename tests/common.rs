// tests/common.rs
#![allow(dead_code)]

use futures_util::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use torn_gateway::config::RateLimits;
use torn_gateway::{Diagnostic, GatewayConfig};

static INIT: Once = Once::new();

pub const WAIT: Duration = Duration::from_secs(5);

pub type ServerSocket = WebSocketStream<TcpStream>;

// Loads .env (for the live tests) and initializes logging once per test binary.
pub fn setup() {
    INIT.call_once(|| {
        if dotenv::from_path(".env").is_err() {
            let _ = dotenv::from_path("../.env");
        }
        env_logger::builder().is_test(true).try_init().ok();
    });
}

pub fn get_env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{} environment variable not set", name))
}

/// Config pointing at local servers with short timings.
pub fn config(ws_url: &str, rest_url: &str) -> GatewayConfig {
    GatewayConfig {
        ws_url: ws_url.to_string(),
        rest_url: rest_url.to_string(),
        reconnect_base_delay: Duration::from_millis(20),
        health_check_interval: Duration::from_secs(3600),
        rate_limits: RateLimits::uniform(Duration::from_millis(300)),
        ..GatewayConfig::default()
    }
}

/// WebSocket server that hands each accepted socket, with its request URI, to the test.
pub async fn ws_server() -> (String, mpsc::UnboundedReceiver<(String, ServerSocket)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let uri = Arc::new(Mutex::new(String::new()));
                let captured = Arc::clone(&uri);
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *captured.lock().unwrap() = req.uri().to_string();
                    Ok(resp)
                };
                if let Ok(ws) = accept_hdr_async(stream, callback).await {
                    let uri = uri.lock().unwrap().clone();
                    let _ = tx.send((uri, ws));
                }
            });
        }
    });

    (format!("ws://{}/", addr), rx)
}

/// Accepts TCP connections and drops them before the handshake, counting them.
pub async fn refusing_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    (format!("ws://{}/", addr), accepted)
}

pub async fn next_connection(
    conns: &mut mpsc::UnboundedReceiver<(String, ServerSocket)>,
) -> (String, ServerSocket) {
    timeout(WAIT, conns.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("server stopped")
}

/// Next text frame from the client, parsed as JSON.
pub async fn next_json(ws: &mut ServerSocket) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("client sent invalid JSON");
        }
    }
}

/// Waits for the first diagnostic matching `pred`, returning everything seen up to and including it.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<Diagnostic>, pred: F) -> Vec<Diagnostic>
where
    F: Fn(&Diagnostic) -> bool,
{
    let mut seen = Vec::new();
    loop {
        match timeout(WAIT, rx.recv()).await {
            Ok(Ok(diagnostic)) => {
                let done = pred(&diagnostic);
                seen.push(diagnostic);
                if done {
                    return seen;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(e)) => panic!("diagnostics channel closed: {}", e),
            Err(_) => panic!("timed out waiting for diagnostic; saw {:?}", seen),
        }
    }
}
