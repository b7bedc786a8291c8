//! Target descriptors as reported by the discovery endpoint.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    ServiceWorker,
    Page,
    Iframe,
    Unknown,
}

impl TargetKind {
    /// Classifies by the CDP `type` field first and falls back to URL heuristics for the
    /// generic `other`/`worker` types some builds report for extension contexts.
    pub fn classify(cdp_type: &str, url: &str) -> Self {
        match cdp_type {
            "service_worker" | "background_page" => TargetKind::ServiceWorker,
            "page" => TargetKind::Page,
            "iframe" => TargetKind::Iframe,
            _ => Self::from_url(url),
        }
    }

    fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.starts_with("chrome-extension://") && path.ends_with(".js") {
            TargetKind::ServiceWorker
        } else if path.ends_with(".html") {
            TargetKind::Page
        } else {
            TargetKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::ServiceWorker => "service_worker",
            TargetKind::Page => "page",
            TargetKind::Iframe => "iframe",
            TargetKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw `/json` entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TargetDescriptor {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub kind: TargetKind,
    pub url: String,
    pub title: String,
    /// Absent when another debugger is already attached to the target.
    pub ws_url: Option<String>,
    pub live: bool,
}

impl Target {
    pub fn new(
        id: impl Into<String>,
        kind: TargetKind,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            url: url.into(),
            title: title.into(),
            ws_url: None,
            live: true,
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    pub fn is_extension(&self) -> bool {
        self.url.starts_with("chrome-extension://")
    }

    /// One-line summary used in diagnostics.
    pub fn describe(&self) -> String {
        format!("[{}] {:?} {}", self.kind, self.title, self.url)
    }
}

impl From<TargetDescriptor> for Target {
    fn from(raw: TargetDescriptor) -> Self {
        let kind = TargetKind::classify(&raw.kind, &raw.url);
        Self {
            id: raw.id,
            kind,
            url: raw.url,
            title: raw.title,
            ws_url: raw.web_socket_debugger_url,
            live: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdp_type_wins_over_url() {
        assert_eq!(
            TargetKind::classify("service_worker", "chrome-extension://xyz/background.js"),
            TargetKind::ServiceWorker
        );
        assert_eq!(
            TargetKind::classify("iframe", "chrome-extension://xyz/pages/frontend.html"),
            TargetKind::Iframe
        );
        assert_eq!(
            TargetKind::classify("page", "chrome-extension://xyz/worker.js"),
            TargetKind::Page
        );
    }

    #[test]
    fn generic_types_fall_back_to_url() {
        assert_eq!(
            TargetKind::classify("other", "chrome-extension://xyz/background.js?v=2"),
            TargetKind::ServiceWorker
        );
        assert_eq!(
            TargetKind::classify("other", "chrome-extension://xyz/pages/options.html"),
            TargetKind::Page
        );
        assert_eq!(
            TargetKind::classify("worker", "https://example.com/sw"),
            TargetKind::Unknown
        );
    }

    #[test]
    fn descriptor_parses_discovery_entry() {
        let raw: TargetDescriptor = serde_json::from_value(serde_json::json!({
            "id": "A",
            "type": "service_worker",
            "url": "chrome-extension://xyz/background.js",
            "title": "Service Worker chrome-extension://xyz/background.js",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A",
            "devtoolsFrontendUrl": "/devtools/inspector.html"
        }))
        .unwrap();
        let target = Target::from(raw);
        assert_eq!(target.kind, TargetKind::ServiceWorker);
        assert_eq!(
            target.ws_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/A")
        );
        assert!(target.live);
        assert!(target.is_extension());
    }
}
