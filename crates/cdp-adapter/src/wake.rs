//! Detection of the extension's background worker, waking it when it sleeps.
//!
//! A dormant MV3 service worker disappears from `/json` while the extension's frontend iframe
//! stays listed. Opening any extension page in a new tab makes the browser start the worker
//! again, after which it reappears within a few discovery polls.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{CdpConfig, ExtensionProfile};
use crate::discovery::{
    describe_targets, observed_summary, select_role, HttpDiscovery, TargetRole, TargetSource,
};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::target::Target;
use crate::transport::{CdpChannel, ConnectOptions};
use crate::util;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeState {
    Unknown,
    Awake,
    IframeFound,
    Waking,
    Failed,
}

#[derive(Clone, Debug)]
pub struct WakeOptions {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// Close the tab opened to wake the worker once the poll finishes.
    pub close_wake_tab: bool,
}

impl Default for WakeOptions {
    fn default() -> Self {
        Self {
            poll_attempts: 30,
            poll_interval: Duration::from_millis(100),
            close_wake_tab: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DetectedExtension {
    pub extension_id: String,
    pub target: Target,
    pub channel: CdpChannel,
    /// True when the worker had to be woken.
    pub woke: bool,
    pub transitions: Vec<WakeState>,
}

pub struct WakeCoordinator {
    source: Arc<dyn TargetSource>,
    profile: ExtensionProfile,
    connect: ConnectOptions,
    options: WakeOptions,
}

impl WakeCoordinator {
    pub fn new(
        source: Arc<dyn TargetSource>,
        profile: ExtensionProfile,
        connect: ConnectOptions,
    ) -> Self {
        Self {
            source,
            profile,
            connect,
            options: WakeOptions::default(),
        }
    }

    pub fn from_config(config: &CdpConfig) -> Result<Self, AdapterError> {
        let discovery = HttpDiscovery::new(config)?;
        Ok(Self::new(
            Arc::new(discovery),
            config.extension.clone(),
            config.connect_options(),
        ))
    }

    pub fn with_options(mut self, options: WakeOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn detect_extension(&self) -> Result<DetectedExtension, AdapterError> {
        let mut transitions = vec![WakeState::Unknown];
        let targets = self.source.list_targets().await?;

        let iframe = match select_role(&targets, &self.profile, TargetRole::Background) {
            Some(found) if !found.is_dormant() => {
                transition(&mut transitions, WakeState::Awake);
                return self.attach(found.target, false, transitions).await;
            }
            Some(found) => found.target,
            None => {
                transition(&mut transitions, WakeState::Failed);
                return Err(not_detected(
                    "neither the background worker nor the frontend iframe is listed",
                    &targets,
                ));
            }
        };
        transition(&mut transitions, WakeState::IframeFound);

        let Some(extension_id) = util::extension_id(&iframe.url) else {
            transition(&mut transitions, WakeState::Failed);
            return Err(not_detected(
                &format!("cannot derive an extension id from {}", iframe.url),
                &targets,
            ));
        };

        transition(&mut transitions, WakeState::Waking);
        match self.wake(&extension_id).await {
            Ok(worker) => {
                transition(&mut transitions, WakeState::Awake);
                self.attach(worker, true, transitions).await
            }
            Err(err) => {
                transition(&mut transitions, WakeState::Failed);
                let observed = self.source.list_targets().await.unwrap_or(targets);
                Err(not_detected(&format!("wake attempt failed: {err}"), &observed))
            }
        }
    }

    async fn attach(
        &self,
        target: Target,
        woke: bool,
        transitions: Vec<WakeState>,
    ) -> Result<DetectedExtension, AdapterError> {
        let ws_url = target.ws_url.clone().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Connection).with_hint(format!(
                "target {} exposes no debugger url (another client attached?)",
                target.id
            ))
        })?;
        let channel = CdpChannel::connect(&ws_url, &self.connect).await?;
        let extension_id = util::extension_id(&target.url).unwrap_or_default();
        info!(
            target: "cdp-wake",
            target_id = %target.id,
            extension_id = %extension_id,
            woke,
            "extension background attached"
        );
        Ok(DetectedExtension {
            extension_id,
            target,
            channel,
            woke,
            transitions,
        })
    }

    async fn wake(&self, extension_id: &str) -> Result<Target, AdapterError> {
        let browser_url = self.source.browser_ws_url().await?;
        let browser_options = ConnectOptions {
            handshake: Vec::new(),
            ..self.connect.clone()
        };
        let browser = CdpChannel::connect(&browser_url, &browser_options).await?;
        let wake_url = util::extension_url(extension_id, &self.profile.wake_page);

        let outcome = self.open_and_poll(&browser, &wake_url).await;
        browser.close().await;
        outcome
    }

    async fn open_and_poll(
        &self,
        browser: &CdpChannel,
        wake_url: &str,
    ) -> Result<Target, AdapterError> {
        let created = browser
            .call_default("Target.createTarget", json!({ "url": wake_url }))
            .await?;
        let tab_id = created
            .get("targetId")
            .and_then(|id| id.as_str())
            .map(str::to_string);
        info!(target: "cdp-wake", url = wake_url, tab_id = ?tab_id, "opened wake tab");

        let mut found = None;
        let mut last_error = None;
        for attempt in 1..=self.options.poll_attempts {
            tokio::time::sleep(self.options.poll_interval).await;
            match self.source.list_targets().await {
                Ok(targets) => {
                    if let Some(hit) = select_role(&targets, &self.profile, TargetRole::Background)
                        .filter(|hit| !hit.is_dormant())
                    {
                        info!(target: "cdp-wake", attempt, target_id = %hit.target.id, "worker is awake");
                        found = Some(hit.target);
                        break;
                    }
                }
                Err(err) => last_error = Some(err),
            }
        }

        if self.options.close_wake_tab {
            if let Some(tab_id) = &tab_id {
                if let Err(err) = browser
                    .call_default("Target.closeTarget", json!({ "targetId": tab_id }))
                    .await
                {
                    warn!(target: "cdp-wake", %tab_id, %err, "failed to close wake tab");
                }
            }
        }

        found.ok_or_else(|| {
            let mut err = AdapterError::new(AdapterErrorKind::Timeout).with_hint(format!(
                "worker did not appear after {} polls every {} ms",
                self.options.poll_attempts,
                self.options.poll_interval.as_millis()
            ));
            if let Some(last) = last_error {
                err = err.with_data(json!({ "lastDiscoveryError": last.to_string() }));
            }
            err
        })
    }
}

fn transition(transitions: &mut Vec<WakeState>, next: WakeState) {
    info!(
        target: "cdp-wake",
        from = ?transitions.last(),
        to = ?next,
        "wake state"
    );
    transitions.push(next);
}

fn not_detected(reason: &str, observed: &[Target]) -> AdapterError {
    AdapterError::new(AdapterErrorKind::ExtensionNotDetected)
        .with_hint(format!("{reason}; observed {}", describe_targets(observed)))
        .with_data(json!({ "observed": observed_summary(observed) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBrowser, FakeCommand, FakeOutbox, FakeReply, FakeTarget};

    const FRONTEND: &str = "chrome-extension://xyz/pages/frontend.html";
    const WORKER: &str = "chrome-extension://xyz/background.js";

    fn coordinator(browser: &FakeBrowser) -> WakeCoordinator {
        let discovery =
            HttpDiscovery::with_endpoint(browser.http_endpoint(), Duration::from_secs(1)).unwrap();
        WakeCoordinator::new(
            Arc::new(discovery),
            ExtensionProfile::default(),
            ConnectOptions::default(),
        )
    }

    #[tokio::test]
    async fn awake_worker_is_attached_directly() {
        let browser = FakeBrowser::start().await;
        browser.add_target(FakeTarget::service_worker("A", WORKER));

        let detected = coordinator(&browser).detect_extension().await.unwrap();
        assert_eq!(detected.target.id, "A");
        assert_eq!(detected.extension_id, "xyz");
        assert!(!detected.woke);
        assert_eq!(detected.transitions, vec![WakeState::Unknown, WakeState::Awake]);
        assert_eq!(browser.created_targets().len(), 0);

        detected.channel.close().await;
        browser.shutdown().await;
    }

    #[tokio::test]
    async fn dormant_worker_is_woken_through_new_tab() {
        let browser = FakeBrowser::start().await;
        browser.add_target(FakeTarget::iframe("F", FRONTEND));
        let waker = browser.clone();
        browser.set_browser_behavior(move |cmd: &FakeCommand, _: &FakeOutbox| {
            if cmd.method == "Target.createTarget" {
                // The worker shows up on the third discovery poll after the tab opens.
                waker.add_target_after_polls(3, FakeTarget::service_worker("SW", WORKER));
                FakeReply::Result(json!({ "targetId": "TAB" }))
            } else {
                FakeReply::Result(json!({}))
            }
        });

        let detected = coordinator(&browser).detect_extension().await.unwrap();
        assert_eq!(detected.target.id, "SW");
        assert!(detected.woke);
        assert_eq!(
            detected.transitions,
            vec![
                WakeState::Unknown,
                WakeState::IframeFound,
                WakeState::Waking,
                WakeState::Awake
            ]
        );
        assert_eq!(
            browser.created_targets(),
            vec!["chrome-extension://xyz/pages/options.html".to_string()]
        );
        assert!(browser
            .browser_commands()
            .iter()
            .any(|cmd| cmd.method == "Target.closeTarget" && cmd.params["targetId"] == "TAB"));

        detected.channel.close().await;
        browser.shutdown().await;
    }

    #[tokio::test]
    async fn nothing_listed_fails_with_observed_targets() {
        let browser = FakeBrowser::start().await;
        browser.add_target(FakeTarget::page("P", "https://example.com/", "Example"));

        let err = coordinator(&browser).detect_extension().await.unwrap_err();
        assert!(err.is(AdapterErrorKind::ExtensionNotDetected));
        assert_eq!(err.data.unwrap()["observed"][0]["url"], "https://example.com/");
        browser.shutdown().await;
    }

    #[tokio::test]
    async fn worker_that_never_wakes_fails_after_bounded_poll() {
        let browser = FakeBrowser::start().await;
        browser.add_target(FakeTarget::iframe("F", FRONTEND));
        browser.set_browser_behavior(|cmd: &FakeCommand, _: &FakeOutbox| {
            if cmd.method == "Target.createTarget" {
                FakeReply::Result(json!({ "targetId": "TAB" }))
            } else {
                FakeReply::Result(json!({}))
            }
        });

        let err = coordinator(&browser)
            .with_options(WakeOptions {
                poll_attempts: 3,
                poll_interval: Duration::from_millis(10),
                close_wake_tab: false,
            })
            .detect_extension()
            .await
            .unwrap_err();
        assert!(err.is(AdapterErrorKind::ExtensionNotDetected));
        assert!(err.hint().contains("3 polls"), "{err}");
        assert!(!browser
            .browser_commands()
            .iter()
            .any(|cmd| cmd.method == "Target.closeTarget"));
        browser.shutdown().await;
    }
}
