use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::console::ExceptionInfo;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::metrics;

/// Unsolicited frame (`{method, params}`) received on a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Capability-enable methods issued before `connect` returns.
    pub handshake: Vec<String>,
    pub connect_timeout: Duration,
    /// Bound used by the handshake and by [`CdpChannel::call_default`].
    pub call_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            handshake: vec!["Runtime.enable".into(), "Log.enable".into()],
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_millis(5_000),
        }
    }
}

impl ConnectOptions {
    /// No handshake; used for the browser-level endpoint which has no Runtime domain.
    pub fn bare() -> Self {
        Self {
            handshake: Vec::new(),
            ..Self::default()
        }
    }

    pub fn with_handshake<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handshake = methods.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct EvalOptions {
    pub await_promise: bool,
    pub timeout: Option<Duration>,
}

impl EvalOptions {
    pub fn awaiting() -> Self {
        Self {
            await_promise: true,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

type Responder = oneshot::Sender<Result<Value, AdapterError>>;
type Predicate = Box<dyn Fn(&TransportEvent) -> bool + Send + Sync>;

struct Observer {
    predicate: Predicate,
    responder: oneshot::Sender<Result<TransportEvent, AdapterError>>,
}

struct ChannelShared {
    url: String,
    next_id: AtomicU64,
    next_observer: AtomicU64,
    pending: DashMap<u64, Responder>,
    observers: DashMap<u64, Observer>,
    events: broadcast::Sender<TransportEvent>,
    alive: AtomicBool,
    shutdown: CancellationToken,
    loop_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// One correlated duplex connection to one CDP target.
///
/// Cloning is cheap; all clones share the id counter, pending map and observers. The socket is
/// owned by a single loop task; dropping every clone (or calling [`CdpChannel::close`]) stops it.
#[derive(Clone)]
pub struct CdpChannel {
    shared: Arc<ChannelShared>,
    outgoing: mpsc::Sender<String>,
    default_timeout: Duration,
}

impl std::fmt::Debug for CdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpChannel")
            .field("url", &self.shared.url)
            .field("open", &self.is_open())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl CdpChannel {
    pub async fn connect(url: &str, options: &ConnectOptions) -> Result<Self, AdapterError> {
        let started = Instant::now();
        let (stream, _) =
            tokio::time::timeout(options.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    AdapterError::new(AdapterErrorKind::Connection)
                        .with_hint(format!(
                            "connecting to {url} timed out after {} ms",
                            options.connect_timeout.as_millis()
                        ))
                        .retriable(true)
                })?
                .map_err(|err| {
                    AdapterError::new(AdapterErrorKind::Connection)
                        .with_hint(format!("{url}: {err}"))
                        .retriable(true)
                })?;

        let channel = Self::spawn(url, stream, options.call_timeout);

        for method in &options.handshake {
            if let Err(err) = channel.call(method, json!({}), options.call_timeout).await {
                channel.close().await;
                return Err(AdapterError::new(AdapterErrorKind::Connection)
                    .with_hint(format!("handshake {method} rejected by {url}: {err}")));
            }
        }

        info!(
            target: "cdp-transport",
            url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "channel established"
        );
        Ok(channel)
    }

    fn spawn<S>(url: &str, stream: S, default_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let (events, _) = broadcast::channel(512);
        let shared = Arc::new(ChannelShared {
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            next_observer: AtomicU64::new(1),
            pending: DashMap::new(),
            observers: DashMap::new(),
            events,
            alive: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            loop_task: parking_lot::Mutex::new(None),
        });
        let (outgoing, outgoing_rx) = mpsc::channel(128);

        let handle = tokio::spawn(run_loop(stream, Arc::clone(&shared), outgoing_rx));
        *shared.loop_task.lock() = Some(handle);

        Self {
            shared,
            outgoing,
            default_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn is_open(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Event observers currently registered.
    pub fn pending_observers(&self) -> usize {
        self.shared.observers.len()
    }

    pub async fn call_default(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.call(method, params, self.default_timeout).await
    }

    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, AdapterError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            id,
        };

        if !self.is_open() {
            return Err(closed_error(&self.shared.url, "channel is closed"));
        }

        let params = if params.is_null() { json!({}) } else { params };
        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        let started = Instant::now();
        metrics::record_command(method);
        debug!(target: "cdp-transport", id, method, "sending command");

        if self.outgoing.send(frame).await.is_err() {
            metrics::record_command_failure(method);
            return Err(closed_error(&self.shared.url, "channel loop has stopped"));
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(closed_error(&self.shared.url, "response handle dropped")),
            Err(_) => {
                metrics::record_timeout();
                Err(AdapterError::new(AdapterErrorKind::Timeout)
                    .with_hint(format!(
                        "no response to {method} (id {id}) within {} ms",
                        timeout.as_millis()
                    ))
                    .retriable(true))
            }
        };

        match &outcome {
            Ok(_) => metrics::record_command_success(method, started.elapsed()),
            Err(err) => {
                debug!(target: "cdp-transport", id, method, %err, "command failed");
                metrics::record_command_failure(method);
            }
        }
        outcome
    }

    /// Registers a listener for the first event matching `predicate`.
    ///
    /// Registration happens before this returns, so an event emitted by anything the caller
    /// triggers afterwards is never missed. The timeout runs from this call.
    pub fn observe<F>(&self, predicate: F, timeout: Duration) -> EventFuture
    where
        F: Fn(&TransportEvent) -> bool + Send + Sync + 'static,
    {
        let id = self.shared.next_observer.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.observers.insert(
            id,
            Observer {
                predicate: Box::new(predicate),
                responder: tx,
            },
        );
        let guard = ObserverGuard {
            shared: Arc::clone(&self.shared),
            id,
        };

        if !self.is_open() {
            drop(guard);
            let err = closed_error(&self.shared.url, "channel is closed");
            return EventFuture {
                inner: Box::pin(async move { Err(err) }),
            };
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let url = self.shared.url.clone();
        EventFuture {
            inner: Box::pin(async move {
                let _guard = guard;
                match tokio::time::timeout_at(deadline, rx).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(closed_error(&url, "observer dropped")),
                    Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout).with_hint(
                        format!("no matching event within {} ms", timeout.as_millis()),
                    )),
                }
            }),
        }
    }

    /// Pass-through stream of every unsolicited event on this channel.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// `Runtime.evaluate` returning the value by value; a thrown exception is a remote error.
    pub async fn evaluate(
        &self,
        expression: &str,
        options: EvalOptions,
    ) -> Result<Value, AdapterError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let response = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": options.await_promise,
                }),
                timeout,
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let info = ExceptionInfo::from_details(details);
            return Err(AdapterError::new(AdapterErrorKind::Remote)
                .with_hint(info.message)
                .with_data(details.clone()));
        }

        Ok(response
            .get("result")
            .and_then(|result| result.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Closes the transport. Safe to call any number of times, from any clone.
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        let handle = self.shared.loop_task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                debug!(target: "cdp-transport", url = %self.shared.url, "channel loop did not stop in time");
            }
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a DashMap<u64, Responder>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

struct ObserverGuard {
    shared: Arc<ChannelShared>,
    id: u64,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.shared.observers.remove(&self.id);
    }
}

/// Future returned by [`CdpChannel::observe`].
pub struct EventFuture {
    inner: Pin<Box<dyn Future<Output = Result<TransportEvent, AdapterError>> + Send>>,
}

impl Future for EventFuture {
    type Output = Result<TransportEvent, AdapterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

async fn run_loop<S>(mut stream: S, shared: Arc<ChannelShared>, mut outgoing: mpsc::Receiver<String>)
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let reason = loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                let _ = stream.send(Message::Close(None)).await;
                break "channel closed".to_string();
            }
            frame = outgoing.recv() => match frame {
                Some(text) => {
                    if let Err(err) = stream.send(Message::Text(text)).await {
                        warn!(target: "cdp-transport", url = %shared.url, %err, "write failed");
                        break format!("write failed: {err}");
                    }
                }
                None => {
                    let _ = stream.send(Message::Close(None)).await;
                    break "all channel handles dropped".to_string();
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => shared.dispatch(&text),
                    Err(_) => debug!(target: "cdp-transport", "ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "cdp-transport", url = %shared.url, ?frame, "closed by remote");
                    break "connection closed by remote".to_string();
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(target: "cdp-transport", url = %shared.url, %err, "read failed");
                    break format!("read failed: {err}");
                }
                None => break "connection ended".to_string(),
            },
        }
    };

    shared.fail_all(&reason);
    debug!(target: "cdp-transport", url = %shared.url, %reason, "channel loop exited");
}

impl ChannelShared {
    fn dispatch(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(target: "cdp-transport", %err, "discarding malformed frame");
                return;
            }
        };

        if let Some(id) = frame.get("id").and_then(Value::as_u64) {
            match self.pending.remove(&id) {
                Some((_, responder)) => {
                    let _ = responder.send(decode_response(&frame));
                }
                None => debug!(target: "cdp-transport", id, "dropping response without a pending call"),
            }
            return;
        }

        let Some(method) = frame.get("method").and_then(Value::as_str) else {
            debug!(target: "cdp-transport", "frame has neither id nor method");
            return;
        };

        let event = TransportEvent {
            method: method.to_string(),
            params: frame.get("params").cloned().unwrap_or(Value::Null),
            session_id: frame
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        metrics::record_event();

        let matched: Vec<u64> = self
            .observers
            .iter()
            .filter(|entry| (entry.value().predicate)(&event))
            .map(|entry| *entry.key())
            .collect();
        for id in matched {
            if let Some((_, observer)) = self.observers.remove(&id) {
                let _ = observer.responder.send(Ok(event.clone()));
            }
        }

        let _ = self.events.send(event);
    }

    fn fail_all(&self, reason: &str) {
        self.alive.store(false, Ordering::SeqCst);

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, responder)) = self.pending.remove(&id) {
                let _ = responder.send(Err(closed_error(&self.url, reason)));
            }
        }

        let ids: Vec<u64> = self.observers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, observer)) = self.observers.remove(&id) {
                let _ = observer.responder.send(Err(closed_error(&self.url, reason)));
            }
        }
    }
}

fn decode_response(frame: &Value) -> Result<Value, AdapterError> {
    if let Some(error) = frame.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown remote error");
        let mut err = AdapterError::new(AdapterErrorKind::Remote)
            .with_hint(message)
            .with_code(code);
        if let Some(data) = error.get("data") {
            err = err.with_data(data.clone());
        }
        return Err(err);
    }
    Ok(frame.get("result").cloned().unwrap_or(Value::Null))
}

fn closed_error(url: &str, reason: &str) -> AdapterError {
    AdapterError::new(AdapterErrorKind::ChannelClosed).with_hint(format!("{url}: {reason}"))
}
