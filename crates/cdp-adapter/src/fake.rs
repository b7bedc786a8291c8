//! Scriptable in-process browser for tests.
//!
//! Serves `/json`, `/json/version` and one WebSocket endpoint per target on an ephemeral port.
//! Each target answers commands through a [`TargetBehavior`]; the default answers every command
//! with an empty result. Every command, connection and discovery request is recorded so tests
//! can assert on what actually reached the "browser".

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BROWSER_KEY: &str = "browser";

#[derive(Clone, Debug, PartialEq)]
pub struct FakeCommand {
    pub id: u64,
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum FakeReply {
    Result(Value),
    Error { code: i64, message: String },
    /// Answer after a delay without blocking other commands on the connection.
    Delayed(Duration, Value),
    NoReply,
    /// Close the socket instead of answering.
    Hangup,
}

pub trait TargetBehavior: Send + Sync + 'static {
    fn handle(&self, command: &FakeCommand, outbox: &FakeOutbox) -> FakeReply;
}

impl<F> TargetBehavior for F
where
    F: Fn(&FakeCommand, &FakeOutbox) -> FakeReply + Send + Sync + 'static,
{
    fn handle(&self, command: &FakeCommand, outbox: &FakeOutbox) -> FakeReply {
        self(command, outbox)
    }
}

enum Outbound {
    Text(String),
    Hangup,
}

/// Write side of one fake connection. Frames are delivered in the order they are pushed, so
/// events emitted by a behavior reach the client before that command's reply.
#[derive(Clone)]
pub struct FakeOutbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FakeOutbox {
    pub fn emit(&self, method: &str, params: Value) {
        let frame = json!({ "method": method, "params": params });
        let _ = self.tx.send(Outbound::Text(frame.to_string()));
    }

    /// `Runtime.consoleAPICalled` with string arguments.
    pub fn emit_console(&self, level: &str, args: &[&str]) {
        let args: Vec<Value> = args
            .iter()
            .map(|arg| json!({ "type": "string", "value": arg }))
            .collect();
        self.emit(
            "Runtime.consoleAPICalled",
            json!({ "type": level, "args": args, "executionContextId": 1, "timestamp": 0.0 }),
        );
    }

    pub fn emit_exception(&self, text: &str) {
        self.emit(
            "Runtime.exceptionThrown",
            json!({
                "timestamp": 0.0,
                "exceptionDetails": {
                    "exceptionId": 1,
                    "text": "Uncaught",
                    "lineNumber": 0,
                    "columnNumber": 0,
                    "exception": { "type": "object", "description": text }
                }
            }),
        );
    }

    fn send_raw(&self, frame: Value) {
        let _ = self.tx.send(Outbound::Text(frame.to_string()));
    }

    fn hangup(&self) {
        let _ = self.tx.send(Outbound::Hangup);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeTarget {
    pub id: String,
    /// CDP `type` as reported by `/json`.
    pub kind: String,
    pub url: String,
    pub title: String,
}

impl FakeTarget {
    pub fn new(id: &str, kind: &str, url: &str, title: &str) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            url: url.into(),
            title: title.into(),
        }
    }

    pub fn page(id: &str, url: &str, title: &str) -> Self {
        Self::new(id, "page", url, title)
    }

    pub fn service_worker(id: &str, url: &str) -> Self {
        Self::new(id, "service_worker", url, &format!("Service Worker {url}"))
    }

    pub fn iframe(id: &str, url: &str) -> Self {
        Self::new(id, "iframe", url, "")
    }
}

#[derive(Default)]
struct Recorded {
    commands: HashMap<String, Vec<FakeCommand>>,
    connections: HashMap<String, usize>,
    created: Vec<String>,
}

struct FakeState {
    addr: SocketAddr,
    targets: Mutex<Vec<FakeTarget>>,
    /// Targets waiting for the given number of further `/json` requests.
    scheduled: Mutex<Vec<(usize, FakeTarget)>>,
    behaviors: Mutex<HashMap<String, Arc<dyn TargetBehavior>>>,
    sessions: Mutex<HashMap<String, Vec<(u64, FakeOutbox)>>>,
    rejections: Mutex<HashMap<String, usize>>,
    connect_delays: Mutex<HashMap<String, Duration>>,
    recorded: Mutex<Recorded>,
    list_requests: AtomicUsize,
    next_session: AtomicU64,
    next_tab: AtomicU64,
    shutdown: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct FakeBrowser {
    state: Arc<FakeState>,
}

impl FakeBrowser {
    /// # Panics
    /// When no loopback port can be bound.
    pub async fn start() -> Self {
        match Self::try_start().await {
            Ok(browser) => browser,
            Err(err) => panic!("fake browser failed to bind: {err}"),
        }
    }

    pub async fn try_start() -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(FakeState {
            addr,
            targets: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
            behaviors: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            rejections: Mutex::new(HashMap::new()),
            connect_delays: Mutex::new(HashMap::new()),
            recorded: Mutex::new(Recorded::default()),
            list_requests: AtomicUsize::new(0),
            next_session: AtomicU64::new(1),
            next_tab: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            server: Mutex::new(None),
        });

        let app = Router::new()
            .route("/json", get(list_handler))
            .route("/json/list", get(list_handler))
            .route("/json/version", get(version_handler))
            .route("/devtools/:kind/:id", get(upgrade_handler))
            .with_state(Arc::clone(&state));

        let token = state.shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
        });
        *state.server.lock() = Some(handle);

        Ok(Self { state })
    }

    pub fn addr(&self) -> SocketAddr {
        self.state.addr
    }

    pub fn port(&self) -> u16 {
        self.state.addr.port()
    }

    pub fn http_endpoint(&self) -> String {
        format!("http://{}", self.state.addr)
    }

    pub fn ws_url(&self, target_id: &str) -> String {
        format!("ws://{}/devtools/page/{}", self.state.addr, target_id)
    }

    pub fn browser_ws_url(&self) -> String {
        format!("ws://{}/devtools/browser/fake", self.state.addr)
    }

    pub fn add_target(&self, target: FakeTarget) {
        let mut targets = self.state.targets.lock();
        targets.retain(|existing| existing.id != target.id);
        targets.push(target);
    }

    /// Lists `target` starting with the `polls`-th `/json` request from now.
    pub fn add_target_after_polls(&self, polls: usize, target: FakeTarget) {
        if polls == 0 {
            self.add_target(target);
        } else {
            self.state.scheduled.lock().push((polls, target));
        }
    }

    /// Stops listing the target. Open connections to it stay up, as with a real browser
    /// whose target vanished before its socket noticed.
    pub fn remove_target(&self, target_id: &str) {
        self.state.targets.lock().retain(|target| target.id != target_id);
    }

    pub fn set_behavior<B: TargetBehavior>(&self, target_id: &str, behavior: B) {
        self.state
            .behaviors
            .lock()
            .insert(target_id.to_string(), Arc::new(behavior));
    }

    /// Behavior of the browser-level endpoint. `Target.createTarget` is recorded either way.
    pub fn set_browser_behavior<B: TargetBehavior>(&self, behavior: B) {
        self.set_behavior(BROWSER_KEY, behavior);
    }

    /// Makes the next `count` connection attempts to the target fail with HTTP 503.
    pub fn reject_connections(&self, target_id: &str, count: usize) {
        self.state
            .rejections
            .lock()
            .insert(target_id.to_string(), count);
    }

    /// Delays the WebSocket handshake for the target.
    pub fn delay_connections(&self, target_id: &str, delay: Duration) {
        self.state
            .connect_delays
            .lock()
            .insert(target_id.to_string(), delay);
    }

    /// Emits an event on every open connection to the target.
    pub fn emit(&self, target_id: &str, method: &str, params: Value) {
        let outboxes: Vec<FakeOutbox> = self
            .state
            .sessions
            .lock()
            .get(target_id)
            .map(|sessions| sessions.iter().map(|(_, outbox)| outbox.clone()).collect())
            .unwrap_or_default();
        for outbox in outboxes {
            outbox.emit(method, params.clone());
        }
    }

    pub fn emit_console(&self, target_id: &str, level: &str, text: &str) {
        self.emit(
            target_id,
            "Runtime.consoleAPICalled",
            json!({ "type": level, "args": [{ "type": "string", "value": text }] }),
        );
    }

    pub fn commands(&self, target_id: &str) -> Vec<FakeCommand> {
        self.state
            .recorded
            .lock()
            .commands
            .get(target_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn browser_commands(&self) -> Vec<FakeCommand> {
        self.commands(BROWSER_KEY)
    }

    /// URLs passed to `Target.createTarget`, in order.
    pub fn created_targets(&self) -> Vec<String> {
        self.state.recorded.lock().created.clone()
    }

    /// Accepted WebSocket connections to the target since start.
    pub fn connection_count(&self, target_id: &str) -> usize {
        self.state
            .recorded
            .lock()
            .connections
            .get(target_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn open_connections(&self, target_id: &str) -> usize {
        self.state
            .sessions
            .lock()
            .get(target_id)
            .map(Vec::len)
            .unwrap_or_default()
    }

    pub fn list_requests(&self) -> usize {
        self.state.list_requests.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) {
        self.state.shutdown.cancel();
        let handle = self.state.server.lock().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}

impl FakeState {
    fn has_target(&self, target_id: &str) -> bool {
        self.targets
            .lock()
            .iter()
            .any(|target| target.id == target_id)
    }

    fn listing(&self) -> Vec<FakeTarget> {
        self.list_requests.fetch_add(1, Ordering::SeqCst);
        let mut due = Vec::new();
        {
            let mut scheduled = self.scheduled.lock();
            scheduled.retain_mut(|(remaining, target)| {
                *remaining -= 1;
                if *remaining == 0 {
                    due.push(target.clone());
                    false
                } else {
                    true
                }
            });
        }
        let mut targets = self.targets.lock();
        for target in due {
            targets.retain(|existing| existing.id != target.id);
            targets.push(target);
        }
        targets.clone()
    }

    fn take_rejection(&self, key: &str) -> bool {
        let mut rejections = self.rejections.lock();
        match rejections.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn handle_frame(&self, key: &str, text: &str, outbox: &FakeOutbox) {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let Some(id) = frame.get("id").and_then(Value::as_u64) else {
            return;
        };
        let command = FakeCommand {
            id,
            method: frame
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            params: frame.get("params").cloned().unwrap_or_else(|| json!({})),
            session_id: frame
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        {
            let mut recorded = self.recorded.lock();
            recorded
                .commands
                .entry(key.to_string())
                .or_default()
                .push(command.clone());
            if key == BROWSER_KEY && command.method == "Target.createTarget" {
                if let Some(url) = command.params.get("url").and_then(Value::as_str) {
                    recorded.created.push(url.to_string());
                }
            }
        }

        let behavior = self.behaviors.lock().get(key).cloned();
        let reply = match behavior {
            Some(behavior) => behavior.handle(&command, outbox),
            None if key == BROWSER_KEY => self.default_browser_reply(&command),
            None => default_target_reply(&command),
        };

        let envelope = |body: Value| {
            let mut frame = body;
            frame["id"] = json!(command.id);
            if let Some(session) = &command.session_id {
                frame["sessionId"] = json!(session);
            }
            frame
        };
        match reply {
            FakeReply::Result(result) => outbox.send_raw(envelope(json!({ "result": result }))),
            FakeReply::Error { code, message } => outbox.send_raw(envelope(
                json!({ "error": { "code": code, "message": message } }),
            )),
            FakeReply::Delayed(delay, result) => {
                let frame = envelope(json!({ "result": result }));
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    outbox.send_raw(frame);
                });
            }
            FakeReply::NoReply => {}
            FakeReply::Hangup => outbox.hangup(),
        }
    }

    fn default_browser_reply(&self, command: &FakeCommand) -> FakeReply {
        match command.method.as_str() {
            "Target.createTarget" => {
                let id = format!("tab-{}", self.next_tab.fetch_add(1, Ordering::SeqCst));
                let url = command
                    .params
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or("about:blank");
                self.targets
                    .lock()
                    .push(FakeTarget::page(&id, url, url));
                FakeReply::Result(json!({ "targetId": id }))
            }
            "Target.closeTarget" => {
                if let Some(id) = command.params.get("targetId").and_then(Value::as_str) {
                    self.targets.lock().retain(|target| target.id != id);
                }
                FakeReply::Result(json!({ "success": true }))
            }
            _ => FakeReply::Result(json!({})),
        }
    }
}

fn default_target_reply(command: &FakeCommand) -> FakeReply {
    match command.method.as_str() {
        "Runtime.evaluate" => FakeReply::Result(json!({ "result": { "type": "undefined" } })),
        _ => FakeReply::Result(json!({})),
    }
}

async fn list_handler(State(state): State<Arc<FakeState>>) -> Json<Value> {
    let addr = state.addr;
    let listing: Vec<Value> = state
        .listing()
        .into_iter()
        .map(|target| {
            json!({
                "id": target.id,
                "type": target.kind,
                "url": target.url,
                "title": target.title,
                "description": "",
                "devtoolsFrontendUrl": format!("/devtools/inspector.html?ws={addr}/devtools/page/{}", target.id),
                "webSocketDebuggerUrl": format!("ws://{addr}/devtools/page/{}", target.id),
            })
        })
        .collect();
    Json(Value::Array(listing))
}

async fn version_handler(State(state): State<Arc<FakeState>>) -> Json<Value> {
    Json(json!({
        "Browser": "FakeChrome/1.0",
        "Protocol-Version": "1.3",
        "webSocketDebuggerUrl": format!("ws://{}/devtools/browser/fake", state.addr),
    }))
}

async fn upgrade_handler(
    State(state): State<Arc<FakeState>>,
    Path((kind, id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    let key = if kind == BROWSER_KEY {
        BROWSER_KEY.to_string()
    } else {
        if !state.has_target(&id) {
            return StatusCode::NOT_FOUND.into_response();
        }
        id
    };

    if state.take_rejection(&key) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let delay = state.connect_delays.lock().get(&key).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    *state
        .recorded
        .lock()
        .connections
        .entry(key.clone())
        .or_default() += 1;
    ws.on_upgrade(move |socket| session(state, key, socket))
}

async fn session(state: Arc<FakeState>, key: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outbox = FakeOutbox { tx };
    let session_id = state.next_session.fetch_add(1, Ordering::SeqCst);
    state
        .sessions
        .lock()
        .entry(key.clone())
        .or_default()
        .push((session_id, outbox.clone()));

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            outbound = rx.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Hangup) | None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => state.handle_frame(&key, &text, &outbox),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    if let Some(sessions) = state.sessions.lock().get_mut(&key) {
        sessions.retain(|(id, _)| *id != session_id);
    }
}
