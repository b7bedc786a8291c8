use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use cdp_adapter::{HttpDiscovery, Target, TargetRegistry, TargetSource};
use event_journal::{EntryKind, Journal, JournalEntry};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client;
use crate::config::ProxyConfig;
use crate::errors::ProxyError;
use crate::metrics;
use crate::passive::PassiveAttachments;
use crate::pool::ConnectionPool;

/// Outcome of one discovery tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub listed: usize,
    pub appeared: Vec<String>,
    pub disappeared: Vec<String>,
    pub attached: Vec<String>,
    pub failed: Vec<String>,
}

pub struct ProxyDaemon;

impl ProxyDaemon {
    pub async fn start(config: ProxyConfig) -> Result<ProxyHandle, ProxyError> {
        let discovery =
            HttpDiscovery::with_endpoint(config.upstream_endpoint(), config.discovery_timeout())?;
        Self::start_with_source(config, Arc::new(discovery)).await
    }

    pub async fn start_with_source(
        config: ProxyConfig,
        source: Arc<dyn TargetSource>,
    ) -> Result<ProxyHandle, ProxyError> {
        let journal = Journal::open(&config.log_file)?;
        let bind_addr = format!("{}:{}", config.bind_host, config.port);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let listen_addr = listener.local_addr().map_err(|source| ProxyError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;

        let inner = Arc::new(ProxyInner {
            pool: ConnectionPool::new(config.connect_options(), journal.clone()),
            passive: PassiveAttachments::new(config.connect_options(), journal.clone()),
            registry: Mutex::new(TargetRegistry::new()),
            tick_lock: tokio::sync::Mutex::new(()),
            closing: AtomicBool::new(false),
            discovery_stop: CancellationToken::new(),
            listener_stop: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
            log_path: config.log_file.clone(),
            source,
            journal,
            config,
        });

        inner.record(
            JournalEntry::new(EntryKind::Proxy)
                .field("message", "proxy started")
                .field("listen", listen_addr.to_string())
                .field("upstream", inner.config.upstream_endpoint()),
        );

        let app = Router::new()
            .route("/", get(client::upgrade_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::clone(&inner));

        let stop = inner.listener_stop.clone();
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
            {
                warn!(target: "cdp-proxy", %err, "listener stopped with error");
            }
        });

        let discovery = tokio::spawn(discovery_loop(Arc::clone(&inner)));
        {
            let mut tasks = inner.tasks.lock();
            tasks.server = Some(server);
            tasks.discovery = Some(discovery);
        }

        info!(
            target: "cdp-proxy",
            listen = %listen_addr,
            upstream = %inner.config.upstream_endpoint(),
            log = %inner.log_path.display(),
            "proxy daemon started"
        );
        Ok(ProxyHandle {
            listen_addr,
            log_path: inner.log_path.clone(),
            inner,
        })
    }
}

/// Handle returned by [`ProxyDaemon::start`].
#[derive(Clone)]
pub struct ProxyHandle {
    pub listen_addr: SocketAddr,
    pub log_path: PathBuf,
    inner: Arc<ProxyInner>,
}

impl ProxyHandle {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.listen_addr)
    }

    /// Runs one discovery tick right away.
    pub async fn tick_now(&self) -> TickReport {
        self.inner.tick().await
    }

    pub fn known_targets(&self) -> Vec<Target> {
        self.inner.registry.lock().snapshot()
    }

    pub fn pooled_targets(&self) -> Vec<String> {
        self.inner.pool.open_targets()
    }

    pub fn passive_targets(&self) -> Vec<String> {
        self.inner.passive.target_ids()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Closes pooled and passive connections, stops discovery, flushes and closes the journal,
    /// then stops the listener. Later calls return immediately.
    pub async fn shutdown(&self) -> Result<(), ProxyError> {
        self.inner.shutdown().await
    }
}

#[derive(Default)]
struct Tasks {
    server: Option<JoinHandle<()>>,
    discovery: Option<JoinHandle<()>>,
}

pub(crate) struct ProxyInner {
    config: ProxyConfig,
    source: Arc<dyn TargetSource>,
    registry: Mutex<TargetRegistry>,
    pool: ConnectionPool,
    passive: PassiveAttachments,
    journal: Journal,
    log_path: PathBuf,
    tick_lock: tokio::sync::Mutex<()>,
    closing: AtomicBool,
    discovery_stop: CancellationToken,
    listener_stop: CancellationToken,
    tasks: Mutex<Tasks>,
}

impl ProxyInner {
    pub(crate) fn record(&self, entry: JournalEntry) {
        if self.journal.append(entry).is_err() {
            debug!(target: "cdp-proxy", "journal closed; entry dropped");
        }
    }

    pub(crate) fn listener_stop(&self) -> CancellationToken {
        self.listener_stop.clone()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    async fn tick(&self) -> TickReport {
        let _tick = self.tick_lock.lock().await;
        let mut report = TickReport::default();
        if self.is_closing() {
            return report;
        }

        let listed = match self.source.list_targets().await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(target: "cdp-proxy", %err, "discovery tick failed");
                self.record(
                    JournalEntry::new(EntryKind::Error)
                        .field("phase", "discovery")
                        .field("message", err.to_string()),
                );
                return report;
            }
        };
        report.listed = listed.len();

        let diff = self.registry.lock().apply(listed);
        for gone in &diff.disappeared {
            let passive = self.passive.detach(&gone.id).await;
            let pooled = self.pool.remove(&gone.id).await;
            self.record(
                JournalEntry::new(EntryKind::Proxy)
                    .target(gone.id.as_str())
                    .field("message", "target disappeared")
                    .field("closedPassive", passive)
                    .field("closedPooled", pooled),
            );
            report.disappeared.push(gone.id.clone());
        }
        // Slots opened through a fallback lookup never entered the registry.
        let untracked: Vec<String> = {
            let registry = self.registry.lock();
            self.pool
                .slot_ids()
                .into_iter()
                .filter(|id| registry.get(id).is_none())
                .collect()
        };
        for id in untracked {
            let pooled = self.pool.remove(&id).await;
            self.record(
                JournalEntry::new(EntryKind::Proxy)
                    .target(id.as_str())
                    .field("message", "untracked target gone")
                    .field("closedPooled", pooled),
            );
            report.disappeared.push(id);
        }
        for fresh in &diff.appeared {
            self.record(
                JournalEntry::new(EntryKind::Proxy)
                    .target(fresh.id.as_str())
                    .field("message", "target appeared")
                    .field("kind", fresh.kind.as_str())
                    .field("url", fresh.url.as_str())
                    .field("title", fresh.title.as_str()),
            );
            report.appeared.push(fresh.id.clone());
        }

        if !self.config.passive_attach {
            return report;
        }

        let candidates: Vec<Target> = self
            .registry
            .lock()
            .snapshot()
            .into_iter()
            .filter(|target| target.ws_url.is_some())
            .filter(|target| !self.passive.has_live(&target.id) && !self.pool.has_open(&target.id))
            .collect();

        let attempts = candidates.iter().map(|target| async move {
            (target, self.passive.attach(target).await)
        });
        for (target, outcome) in futures::future::join_all(attempts).await {
            match outcome {
                Ok(()) => report.attached.push(target.id.clone()),
                Err(err) => {
                    warn!(target: "cdp-proxy", target_id = %target.id, %err, "passive attach failed");
                    self.record(
                        JournalEntry::new(EntryKind::Error)
                            .target(target.id.as_str())
                            .field("phase", "passive-attach")
                            .field("message", err.to_string()),
                    );
                    report.failed.push(target.id.clone());
                }
            }
        }
        report
    }

    /// Resolves a client-named target from the last tick, or from a fresh listing when the
    /// target appeared since.
    async fn resolve(&self, target_id: &str) -> Result<Target, ProxyError> {
        let known = self.registry.lock().get(target_id).cloned();
        if let Some(target) = known {
            return Ok(target);
        }
        let listed = self.source.list_targets().await?;
        listed
            .into_iter()
            .find(|target| target.id == target_id)
            .ok_or_else(|| ProxyError::UnknownTarget(target_id.to_string()))
    }

    /// Handles one client frame and returns the reply envelope.
    pub(crate) async fn handle_client_frame(&self, client_id: &str, text: &str) -> Value {
        let request: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                metrics::record_client_request(false);
                return envelope(None, Err(ProxyError::BadRequest(err.to_string()).to_string()));
            }
        };
        let request_id = request.get("id").cloned();

        let outcome = self.forward(client_id, &request).await;
        metrics::record_client_request(outcome.is_ok());
        envelope(request_id, outcome)
    }

    async fn forward(&self, client_id: &str, request: &Value) -> Result<Value, String> {
        let target_id = request
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| ProxyError::BadRequest("missing targetId".into()).to_string())?;
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| ProxyError::BadRequest("missing method".into()).to_string())?;
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

        if self.is_closing() {
            return Err(ProxyError::ShuttingDown.to_string());
        }

        self.record(
            JournalEntry::new(EntryKind::Request)
                .target(target_id)
                .field("clientId", client_id)
                .field("requestId", request.get("id").cloned().unwrap_or(Value::Null))
                .field("method", method)
                .field("params", params.clone()),
        );

        let started = Instant::now();
        let target = match self.resolve(target_id).await {
            Ok(target) => target,
            Err(err) => return Err(self.fail(target_id, "resolve", err)),
        };
        let channel = match self.pool.get_or_connect(&target).await {
            Ok(channel) => channel,
            Err(err) => return Err(self.fail(target_id, "connect", ProxyError::Upstream(err))),
        };

        let result = channel
            .call(method, params, self.config.request_timeout())
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut entry = JournalEntry::new(EntryKind::Response)
            .target(target_id)
            .field("clientId", client_id)
            .field("requestId", request.get("id").cloned().unwrap_or(Value::Null))
            .field("method", method)
            .field("elapsedMs", elapsed_ms);
        match result {
            Ok(value) => {
                entry = entry.field("result", value.clone());
                self.record(entry);
                Ok(value)
            }
            Err(err) => {
                let message = err.to_string();
                self.record(entry.field("error", message.as_str()));
                Err(message)
            }
        }
    }

    fn fail(&self, target_id: &str, phase: &str, err: ProxyError) -> String {
        let message = err.to_string();
        warn!(target: "cdp-proxy", target_id, phase, %message, "client request failed");
        self.record(
            JournalEntry::new(EntryKind::Error)
                .target(target_id)
                .field("phase", phase)
                .field("message", message.as_str()),
        );
        message
    }

    async fn shutdown(&self) -> Result<(), ProxyError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.record(JournalEntry::new(EntryKind::Proxy).field("message", "proxy shutting down"));

        {
            let _tick = self.tick_lock.lock().await;
            self.pool.close_all().await;
            self.passive.detach_all().await;
        }

        self.discovery_stop.cancel();
        let discovery = self.tasks.lock().discovery.take();
        if let Some(handle) = discovery {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        let journal = self.journal.clone();
        let closed = tokio::task::spawn_blocking(move || journal.close()).await;

        self.listener_stop.cancel();
        let server = self.tasks.lock().server.take();
        if let Some(handle) = server {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        info!(target: "cdp-proxy", "proxy daemon stopped");

        match closed {
            Ok(result) => result.map_err(ProxyError::from),
            Err(err) => {
                warn!(target: "cdp-proxy", %err, "journal close task failed");
                Ok(())
            }
        }
    }
}

async fn discovery_loop(inner: Arc<ProxyInner>) {
    let mut ticker = interval(inner.config.discovery_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = inner.discovery_stop.cancelled() => break,
            _ = ticker.tick() => {
                let report = inner.tick().await;
                if !report.appeared.is_empty() || !report.disappeared.is_empty() || !report.failed.is_empty() {
                    debug!(target: "cdp-proxy", ?report, "discovery tick");
                }
            }
        }
    }
}

fn envelope(id: Option<Value>, outcome: Result<Value, String>) -> Value {
    let mut reply = match outcome {
        Ok(result) => json!({ "result": result }),
        Err(message) => json!({ "error": { "message": message } }),
    };
    if let Some(id) = id {
        reply["id"] = id;
    }
    reply
}

async fn health_handler(State(inner): State<Arc<ProxyInner>>) -> Json<Value> {
    let targets = inner.registry.lock().len();
    let status = if inner.is_closing() { "closing" } else { "ok" };
    Json(json!({
        "status": status,
        "targets": targets,
        "pooled": inner.pool.open_targets(),
        "passive": inner.passive.target_ids(),
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_echoes_client_id() {
        let ok = envelope(Some(json!(7)), Ok(json!({ "value": 1 })));
        assert_eq!(ok, json!({ "id": 7, "result": { "value": 1 } }));

        let err = envelope(None, Err("unknown target X".into()));
        assert_eq!(err, json!({ "error": { "message": "unknown target X" } }));
    }
}
