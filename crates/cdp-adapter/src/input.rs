//! Synthetic keyboard input and page focus.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::transport::CdpChannel;

/// One key press: `keyDown`, `char` (printable keys only), `keyUp`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: String,
    pub code: Option<String>,
    pub text: Option<String>,
    pub key_code: Option<u32>,
}

const NAMED_KEYS: &[(&str, u32)] = &[
    ("Enter", 13),
    ("Escape", 27),
    ("Tab", 9),
    ("Backspace", 8),
    ("Delete", 46),
    ("Space", 32),
    ("ArrowLeft", 37),
    ("ArrowUp", 38),
    ("ArrowRight", 39),
    ("ArrowDown", 40),
    ("PageUp", 33),
    ("PageDown", 34),
    ("End", 35),
    ("Home", 36),
];

impl KeyStroke {
    /// Parses a single character (`j`, `G`, `/`) or a DOM key name (`Enter`, `ArrowDown`).
    pub fn parse(input: &str) -> Result<Self, AdapterError> {
        let mut chars = input.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            return Ok(Self::character(ch));
        }

        let name = match input {
            "Esc" => "Escape",
            "Return" => "Enter",
            "Down" => "ArrowDown",
            "Up" => "ArrowUp",
            "Left" => "ArrowLeft",
            "Right" => "ArrowRight",
            other => other,
        };
        let (name, key_code) = NAMED_KEYS
            .iter()
            .find(|(known, _)| *known == name)
            .copied()
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("unknown key name {input:?}"))
            })?;

        if name == "Space" {
            return Ok(Self::character(' '));
        }
        Ok(Self {
            key: name.to_string(),
            code: Some(name.to_string()),
            text: (name == "Enter").then(|| "\r".to_string()),
            key_code: Some(key_code),
        })
    }

    fn character(ch: char) -> Self {
        let (code, key_code) = if ch.is_ascii_alphabetic() {
            let upper = ch.to_ascii_uppercase();
            (Some(format!("Key{upper}")), Some(upper as u32))
        } else if ch.is_ascii_digit() {
            (Some(format!("Digit{ch}")), Some(ch as u32))
        } else if ch == ' ' {
            (Some("Space".to_string()), Some(32))
        } else {
            (None, None)
        };
        Self {
            key: ch.to_string(),
            code,
            text: Some(ch.to_string()),
            key_code,
        }
    }

    fn event_params(&self, kind: &str) -> Value {
        let mut params = Map::new();
        params.insert("type".into(), json!(kind));
        params.insert("key".into(), json!(self.key));
        if kind == "char" {
            if let Some(text) = &self.text {
                params.insert("text".into(), json!(text));
            }
            return Value::Object(params);
        }
        if let Some(code) = &self.code {
            params.insert("code".into(), json!(code));
        }
        if let Some(key_code) = self.key_code {
            params.insert("windowsVirtualKeyCode".into(), json!(key_code));
            params.insert("nativeVirtualKeyCode".into(), json!(key_code));
        }
        Value::Object(params)
    }
}

pub async fn dispatch_key(
    channel: &CdpChannel,
    stroke: &KeyStroke,
    timeout: Duration,
) -> Result<(), AdapterError> {
    debug!(target: "cdp-transport", key = %stroke.key, "dispatching key");
    channel
        .call("Input.dispatchKeyEvent", stroke.event_params("keyDown"), timeout)
        .await?;
    if stroke.text.is_some() {
        channel
            .call("Input.dispatchKeyEvent", stroke.event_params("char"), timeout)
            .await?;
    }
    channel
        .call("Input.dispatchKeyEvent", stroke.event_params("keyUp"), timeout)
        .await?;
    Ok(())
}

pub async fn bring_to_front(channel: &CdpChannel) -> Result<(), AdapterError> {
    channel.call_default("Page.bringToFront", json!({})).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBrowser, FakeCommand, FakeOutbox, FakeReply, FakeTarget};
    use crate::transport::ConnectOptions;

    #[test]
    fn parses_letters_with_key_codes() {
        let t = KeyStroke::parse("t").unwrap();
        assert_eq!(t.code.as_deref(), Some("KeyT"));
        assert_eq!(t.key_code, Some(84));
        assert_eq!(t.text.as_deref(), Some("t"));

        let digit = KeyStroke::parse("7").unwrap();
        assert_eq!(digit.code.as_deref(), Some("Digit7"));
        assert_eq!(digit.key_code, Some(55));
    }

    #[test]
    fn parses_named_keys_without_char_event() {
        let down = KeyStroke::parse("ArrowDown").unwrap();
        assert_eq!(down.key_code, Some(40));
        assert!(down.text.is_none());

        let enter = KeyStroke::parse("Return").unwrap();
        assert_eq!(enter.key, "Enter");
        assert_eq!(enter.key_code, Some(13));

        assert!(KeyStroke::parse("Hyper").is_err());
    }

    #[tokio::test]
    async fn printable_key_sends_three_events() {
        let browser = FakeBrowser::start().await;
        browser.add_target(FakeTarget::page("P", "https://example.com/", "Example"));
        browser.set_behavior("P", |_: &FakeCommand, _: &FakeOutbox| FakeReply::Result(json!({})));

        let channel = CdpChannel::connect(&browser.ws_url("P"), &ConnectOptions::default())
            .await
            .unwrap();
        dispatch_key(&channel, &KeyStroke::parse("j").unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        dispatch_key(
            &channel,
            &KeyStroke::parse("ArrowDown").unwrap(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let kinds: Vec<String> = browser
            .commands("P")
            .into_iter()
            .filter(|cmd| cmd.method == "Input.dispatchKeyEvent")
            .map(|cmd| cmd.params["type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(kinds, vec!["keyDown", "char", "keyUp", "keyDown", "keyUp"]);

        channel.close().await;
        browser.shutdown().await;
    }
}
