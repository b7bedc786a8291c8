//! HTTP target discovery and role matching.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{CdpConfig, ExtensionProfile};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::target::{Target, TargetDescriptor, TargetKind};

/// Anything that can answer "which targets exist right now".
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<Target>, AdapterError>;

    /// WebSocket URL of the browser-level (not per-target) endpoint.
    async fn browser_ws_url(&self) -> Result<String, AdapterError>;
}

/// `GET /json` and `GET /json/version` against the remote-debugging port.
#[derive(Clone, Debug)]
pub struct HttpDiscovery {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    web_socket_debugger_url: Option<String>,
    #[serde(rename = "Browser", default)]
    browser: Option<String>,
}

impl HttpDiscovery {
    pub fn new(config: &CdpConfig) -> Result<Self, AdapterError> {
        Self::with_endpoint(config.endpoint(), config.discovery_timeout())
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("building discovery client: {err}"))
            })?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fast environment check run before anything else touches the browser.
    pub async fn preflight(&self) -> Result<Vec<Target>, AdapterError> {
        let started = Instant::now();
        let targets = self.list_targets().await?;
        if let Ok(version) = self.fetch::<VersionInfo>("/json/version").await {
            debug!(
                target: "cdp-discovery",
                browser = version.browser.as_deref().unwrap_or("unknown"),
                "browser endpoint reachable"
            );
        }
        debug!(
            target: "cdp-discovery",
            endpoint = %self.endpoint,
            targets = targets.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "preflight ok"
        );
        Ok(targets)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.endpoint, path);
        let unavailable = |reason: String| {
            AdapterError::new(AdapterErrorKind::DiscoveryUnavailable)
                .with_hint(format!(
                    "{url}: {reason}; is the browser running with --remote-debugging-port?"
                ))
                .retriable(true)
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("status {}", response.status())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| unavailable(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint(format!("{url} returned malformed JSON: {err}"))
        })
    }
}

#[async_trait]
impl TargetSource for HttpDiscovery {
    async fn list_targets(&self) -> Result<Vec<Target>, AdapterError> {
        let raw: Vec<TargetDescriptor> = self.fetch("/json").await?;
        Ok(raw.into_iter().map(Target::from).collect())
    }

    async fn browser_ws_url(&self) -> Result<String, AdapterError> {
        let version: VersionInfo = self.fetch("/json/version").await?;
        version.web_socket_debugger_url.ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint("/json/version carries no webSocketDebuggerUrl")
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRole {
    /// The extension's service worker.
    Background,
    /// The iframe the extension injects into every page.
    Frontend,
    /// The extension page used to wake the worker.
    Options,
}

impl TargetRole {
    pub fn expected_kind(&self) -> TargetKind {
        match self {
            TargetRole::Background => TargetKind::ServiceWorker,
            TargetRole::Frontend => TargetKind::Iframe,
            TargetRole::Options => TargetKind::Page,
        }
    }

    fn url_fragment<'a>(&self, profile: &'a ExtensionProfile) -> &'a str {
        match self {
            TargetRole::Background => &profile.background_script,
            TargetRole::Frontend => &profile.frontend_page,
            TargetRole::Options => &profile.wake_page,
        }
    }

    fn title<'a>(&self, profile: &'a ExtensionProfile) -> Option<&'a str> {
        match self {
            TargetRole::Background => profile.title.as_deref(),
            _ => None,
        }
    }
}

impl std::str::FromStr for TargetRole {
    type Err = AdapterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "background" | "service_worker" | "worker" => Ok(TargetRole::Background),
            "frontend" | "iframe" => Ok(TargetRole::Frontend),
            "options" | "page" => Ok(TargetRole::Options),
            other => Err(AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("unknown role {other:?}"))),
        }
    }
}

impl std::fmt::Display for TargetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetRole::Background => "background",
            TargetRole::Frontend => "frontend",
            TargetRole::Options => "options",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchVia {
    Title,
    UrlSubstring,
    /// Background role satisfied by the frontend iframe; the worker is loaded but asleep.
    DormantProxy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoleMatch {
    pub target: Target,
    pub via: MatchVia,
}

impl RoleMatch {
    pub fn is_dormant(&self) -> bool {
        self.via == MatchVia::DormantProxy
    }
}

/// Priority order: exact title, URL fragment for the role, then (background only) the
/// always-present frontend iframe.
pub fn select_role(
    targets: &[Target],
    profile: &ExtensionProfile,
    role: TargetRole,
) -> Option<RoleMatch> {
    if let Some(title) = role.title(profile) {
        if let Some(target) = targets.iter().find(|target| target.title == title) {
            return Some(RoleMatch {
                target: target.clone(),
                via: MatchVia::Title,
            });
        }
    }

    let fragment = role.url_fragment(profile);
    let expected = role.expected_kind();
    if let Some(target) = targets.iter().find(|target| {
        target.url.contains(fragment)
            && (target.kind == expected || target.kind == TargetKind::Unknown)
    }) {
        return Some(RoleMatch {
            target: target.clone(),
            via: MatchVia::UrlSubstring,
        });
    }

    if role == TargetRole::Background {
        return select_role(targets, profile, TargetRole::Frontend).map(|found| RoleMatch {
            target: found.target,
            via: MatchVia::DormantProxy,
        });
    }
    None
}

pub async fn find_by_role(
    source: &dyn TargetSource,
    profile: &ExtensionProfile,
    role: TargetRole,
) -> Result<RoleMatch, AdapterError> {
    let targets = source.list_targets().await?;
    match select_role(&targets, profile, role) {
        Some(found) => {
            debug!(
                target: "cdp-discovery",
                %role,
                target_id = %found.target.id,
                via = ?found.via,
                "role resolved"
            );
            Ok(found)
        }
        None => Err(target_not_found(&format!("role {role}"), &targets)),
    }
}

/// Waits for a target whose URL contains `pattern`, polling with a bounded backoff until
/// `wait` has elapsed. The first poll happens immediately.
pub async fn find_by_url_substring(
    source: &dyn TargetSource,
    pattern: &str,
    wait: Duration,
) -> Result<Target, AdapterError> {
    let deadline = Instant::now() + wait;
    let mut delay = Duration::from_millis(50);
    loop {
        let targets = source.list_targets().await?;
        if let Some(target) = targets.iter().find(|target| target.url.contains(pattern)) {
            return Ok(target.clone());
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(target: "cdp-discovery", pattern, "no target matched before deadline");
            return Err(target_not_found(&format!("url containing {pattern:?}"), &targets));
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(Duration::from_millis(500));
    }
}

/// Lists every observed target so a failed lookup is debuggable from the error alone.
pub fn target_not_found(wanted: &str, observed: &[Target]) -> AdapterError {
    AdapterError::new(AdapterErrorKind::TargetNotFound)
        .with_hint(format!(
            "no target for {wanted}; observed {}",
            describe_targets(observed)
        ))
        .with_data(json!({ "wanted": wanted, "observed": observed_summary(observed) }))
}

pub fn observed_summary(observed: &[Target]) -> Value {
    Value::Array(
        observed
            .iter()
            .map(|target| {
                json!({ "title": target.title, "type": target.kind.as_str(), "url": target.url })
            })
            .collect(),
    )
}

pub fn describe_targets(observed: &[Target]) -> String {
    if observed.is_empty() {
        return "no targets".to_string();
    }
    observed
        .iter()
        .map(Target::describe)
        .collect::<Vec<_>>()
        .join(", ")
}
