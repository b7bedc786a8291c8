use std::path::Path;
use std::time::{Duration, Instant};

use cdp_adapter::console::ExceptionInfo;
use cdp_adapter::{CdpChannel, EvalOptions};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::bridge::StorageBridge;
use crate::errors::InjectError;
use crate::model::{
    content_hash, ConfigSnapshot, InjectPhase, InjectReport, InjectRequest, ReadinessProbe,
    ReadyReport, StorageKeys, StoreReport, VerifyReport,
};

/// Interval between readiness probes.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drives VALIDATE → STORE → AWAIT_READY → POST_VERIFY against one extension channel.
///
/// The channel should be attached to a context with `chrome.storage` access, normally the
/// extension's background service worker.
pub struct ConfigInjector {
    channel: CdpChannel,
    keys: StorageKeys,
    poll_interval: Duration,
}

impl ConfigInjector {
    pub fn new(channel: CdpChannel) -> Self {
        Self {
            channel,
            keys: StorageKeys::default(),
            poll_interval: READY_POLL_INTERVAL,
        }
    }

    pub fn with_keys(mut self, keys: StorageKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub async fn inject(&self, request: &InjectRequest) -> InjectReport {
        let mut report = InjectReport::started(request.source.clone());
        let started = Instant::now();

        // VALIDATE
        let content = match read_source(&request.source).await {
            Ok(content) => content,
            Err(err) => return self.finish(report.fail(err.to_string()), started),
        };
        report.validate.bytes = content.len();
        if let Err(err) = self.check_syntax(&content, &request.source).await {
            return self.finish(report.fail(err.to_string()), started);
        }
        report.validate.syntax_valid = true;

        // STORE
        report.phase = InjectPhase::Store;
        let hash = content_hash(content.as_bytes());
        let bridge = StorageBridge::new(&self.channel, &self.keys);
        if let Err(err) = bridge
            .write(&content, &request.storage_path, request.advanced)
            .await
        {
            let err = InjectError::StorageWrite(err.to_string());
            return self.finish(report.fail(err.to_string()), started);
        }
        report.store = Some(StoreReport {
            hash: hash.clone(),
            storage_path: request.storage_path.clone(),
            advanced: request.advanced,
        });
        debug!(target: "config-injector", %hash, path = %request.storage_path, "config stored");

        // AWAIT_READY
        report.phase = InjectPhase::AwaitReady;
        let ready = self.await_ready(&request.readiness, request.ready_timeout).await;
        match ready {
            Ok(ready) => {
                let timed_out = !ready.ready;
                let err = InjectError::NotReady {
                    waited_ms: ready.elapsed_ms,
                    polls: ready.polls,
                };
                report.ready = Some(ready);
                if timed_out {
                    return self.finish(report.fail(err.to_string()), started);
                }
            }
            Err(err) => return self.finish(report.fail(err.to_string()), started),
        }

        // POST_VERIFY
        report.phase = InjectPhase::PostVerify;
        let actual = match self.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => return self.finish(report.fail(err.to_string()), started),
        };
        let expected = ConfigSnapshot::stored(
            Some(&content),
            request.storage_path.as_str(),
            request.advanced,
        );
        let verify = VerifyReport {
            hash_matches: actual.content_hash == expected.content_hash,
            path_matches: actual.storage_path == expected.storage_path,
            advanced_matches: !request.advanced || actual.advanced,
            expected,
            actual,
        };
        let verified = verify.hash_matches && verify.path_matches && verify.advanced_matches;
        let mismatch = InjectError::Verification {
            expected: verify.expected.clone(),
            actual: verify.actual.clone(),
        };
        report.verify = Some(verify);
        if !verified {
            return self.finish(report.fail(mismatch.to_string()), started);
        }

        self.finish(report.succeed(), started)
    }

    /// Resets the three keys to empty strings and `false`.
    pub async fn clear(&self) -> Result<(), InjectError> {
        StorageBridge::new(&self.channel, &self.keys)
            .write("", "", false)
            .await
            .map_err(|err| InjectError::StorageWrite(err.to_string()))?;
        debug!(target: "config-injector", "config cleared");
        Ok(())
    }

    pub async fn read_snapshot(&self) -> Result<ConfigSnapshot, InjectError> {
        let stored = StorageBridge::new(&self.channel, &self.keys).read().await?;
        Ok(snapshot_from(&self.keys, &stored))
    }

    /// `Runtime.compileScript` without persisting: a parse, never an execution.
    async fn check_syntax(&self, content: &str, source: &Path) -> Result<(), InjectError> {
        let response = self
            .channel
            .call(
                "Runtime.compileScript",
                json!({
                    "expression": content,
                    "sourceURL": source.display().to_string(),
                    "persistScript": false,
                }),
                self.channel.default_timeout(),
            )
            .await?;
        match response.get("exceptionDetails") {
            Some(details) => {
                let info = ExceptionInfo::from_details(details);
                let location = match (info.line, info.column) {
                    (Some(line), Some(column)) => format!(" at {}:{}", line + 1, column + 1),
                    _ => String::new(),
                };
                Err(InjectError::Validation(format!("{}{location}", info.message)))
            }
            None => Ok(()),
        }
    }

    async fn await_ready(
        &self,
        probe: &ReadinessProbe,
        timeout: Duration,
    ) -> Result<ReadyReport, InjectError> {
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            polls += 1;
            let ready = match probe {
                ReadinessProbe::StoredContent => {
                    StorageBridge::new(&self.channel, &self.keys)
                        .content_ready()
                        .await?
                }
                ReadinessProbe::Expression(expression) => {
                    let value = self
                        .channel
                        .evaluate(expression, EvalOptions::awaiting())
                        .await?;
                    truthy(&value)
                }
            };
            let elapsed = started.elapsed();
            if ready || elapsed >= timeout {
                return Ok(ReadyReport {
                    ready,
                    polls,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    fn finish(&self, report: InjectReport, started: Instant) -> InjectReport {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &report.error {
            None => info!(
                target: "config-injector",
                source = %report.source.display(),
                elapsed_ms,
                "config injected and verified"
            ),
            Some(failure) => warn!(
                target: "config-injector",
                source = %report.source.display(),
                phase = %failure.phase,
                message = %failure.message,
                elapsed_ms,
                "config injection failed"
            ),
        }
        report
    }
}

async fn read_source(path: &Path) -> Result<String, InjectError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| InjectError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|err| {
        InjectError::Validation(format!(
            "{} is not valid UTF-8 (byte {})",
            path.display(),
            err.utf8_error().valid_up_to()
        ))
    })
}

fn snapshot_from(keys: &StorageKeys, stored: &Map<String, Value>) -> ConfigSnapshot {
    ConfigSnapshot::stored(
        stored.get(&keys.content).and_then(Value::as_str),
        stored
            .get(&keys.path)
            .and_then(Value::as_str)
            .unwrap_or_default(),
        stored
            .get(&keys.advanced)
            .and_then(Value::as_bool)
            .unwrap_or(false),
    )
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0 && !n.is_nan()).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
