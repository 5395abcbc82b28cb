//! In-process Classify server double: REST capture plus a push socket.

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};

/// A captured request for assertions.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Value,
}

/// A response returned instead of the per-method default.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Option<Value>,
    pub delay_ms: u64,
}

impl MockResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
            delay_ms: 0,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: None,
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    listings: Arc<Mutex<HashMap<String, Value>>>,
    frames: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
    connections: Arc<AtomicUsize>,
    next_id: Arc<AtomicUsize>,
}

/// Mock Classify server for testing.
pub struct MockServer {
    pub addr: SocketAddr,
    state: MockState,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl MockServer {
    /// Start a new mock server on an ephemeral port.
    pub async fn start() -> Self {
        let (frames, _) = broadcast::channel(1024);
        let (kick, _) = broadcast::channel(8);
        let state = MockState {
            requests: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            listings: Arc::new(Mutex::new(HashMap::new())),
            frames,
            kick,
            connections: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicUsize::new(1)),
        };

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/{*path}", any(handle_request))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .ok();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        Self {
            addr,
            state,
            shutdown: shutdown_tx,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn socket_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn api(&self) -> classify::ApiClient {
        classify::ApiClient::new(url::Url::parse(&self.base_url()).unwrap()).unwrap()
    }

    /// Body served for `GET path` when no response is queued.
    pub async fn set_listing(&self, path: &str, body: Value) {
        self.state.listings.lock().await.insert(path.to_string(), body);
    }

    /// Enqueue a response for the next request, whatever its method.
    pub async fn enqueue_response(&self, resp: MockResponse) {
        self.state.responses.lock().await.push_back(resp);
    }

    pub async fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().await.clone()
    }

    pub async fn requests_with(&self, method: &str) -> Vec<CapturedRequest> {
        self.captured_requests()
            .await
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    /// Push an event frame to every connected socket.
    pub fn push_event(&self, topic: &str, data: Value) {
        self.push_raw(&json!({ "event": topic, "status": "", "name": "", "data": data }).to_string());
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.state.frames.send(frame.to_string());
    }

    /// Close every connected socket from the server side.
    pub fn kick(&self) {
        let _ = self.state.kick.send(());
    }

    /// Sockets accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, count: usize) -> bool {
        let connections = self.state.connections.clone();
        eventually(3000, || connections.load(Ordering::SeqCst) >= count).await
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn ws_handler(State(state): State<MockState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: MockState, mut socket: WebSocket) {
    let mut frames = state.frames.subscribe();
    let mut kick = state.kick.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

async fn handle_request(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    let query: HashMap<String, String> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    state.requests.lock().await.push(CapturedRequest {
        method: method.to_string(),
        path: path.clone(),
        query,
        body: body.clone(),
    });

    let queued = state.responses.lock().await.pop_front();
    if let Some(resp) = queued {
        if resp.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(resp.delay_ms)).await;
        }
        let status = StatusCode::from_u16(resp.status).unwrap();
        return match resp.body {
            Some(body) => (status, Json(body)).into_response(),
            None => status.into_response(),
        };
    }

    match method {
        Method::GET => {
            let listing = state.listings.lock().await.get(&path).cloned();
            Json(listing.unwrap_or_else(|| json!({}))).into_response()
        }
        Method::POST => {
            let name = body
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| state.next_id.fetch_add(1, Ordering::SeqCst).to_string());
            if path == "/collections" {
                StatusCode::NO_CONTENT.into_response()
            } else {
                Json(json!({ "name": name })).into_response()
            }
        }
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Poll `check` until it holds or `timeout_ms` elapses.
pub async fn eventually(timeout_ms: u64, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A local port with nothing listening on it.
pub fn reserve_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
