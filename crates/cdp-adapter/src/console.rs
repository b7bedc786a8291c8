//! Decoding of console and exception events.

use serde::Serialize;
use serde_json::Value;

use crate::transport::TransportEvent;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
    pub args: Vec<Value>,
    pub url: Option<String>,
}

impl ConsoleMessage {
    /// Decodes `Runtime.consoleAPICalled` and `Log.entryAdded`; anything else is `None`.
    pub fn from_event(event: &TransportEvent) -> Option<Self> {
        match event.method.as_str() {
            "Runtime.consoleAPICalled" => {
                let args = event
                    .params
                    .get("args")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let level = event
                    .params
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("log")
                    .to_string();
                let url = event
                    .params
                    .pointer("/stackTrace/callFrames/0/url")
                    .and_then(Value::as_str)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string);
                Some(Self {
                    level,
                    text: render_args(&args),
                    args,
                    url,
                })
            }
            "Log.entryAdded" => {
                let entry = event.params.get("entry")?;
                Some(Self {
                    level: entry
                        .get("level")
                        .and_then(Value::as_str)
                        .unwrap_or("info")
                        .to_string(),
                    text: entry
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    args: Vec::new(),
                    url: entry.get("url").and_then(Value::as_str).map(str::to_string),
                })
            }
            _ => None,
        }
    }

    /// Text of the first argument, if it was a string.
    pub fn first_arg_text(&self) -> Option<&str> {
        first_arg_text(&self.args)
    }
}

/// Text of the first `Runtime.consoleAPICalled` argument, without building a message.
pub fn first_arg_text(args: &[Value]) -> Option<&str> {
    args.first()
        .and_then(|arg| arg.get("value"))
        .and_then(Value::as_str)
}

/// Same rendering as a devtools console line: strings by value, everything else by value or
/// description, separated by single spaces.
pub fn render_args(args: &[Value]) -> String {
    args.iter()
        .map(render_arg)
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_arg(arg: &Value) -> String {
    let is_string = arg.get("type").and_then(Value::as_str) == Some("string");
    match (is_string, arg.get("value")) {
        (true, Some(Value::String(text))) => text.clone(),
        (_, Some(Value::String(text))) => text.clone(),
        (_, Some(Value::Null)) | (_, None) => arg
            .get("description")
            .and_then(Value::as_str)
            .or_else(|| arg.get("type").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string(),
        (_, Some(other)) => other.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExceptionInfo {
    pub message: String,
    pub url: Option<String>,
    pub line: Option<u64>,
    pub column: Option<u64>,
}

impl ExceptionInfo {
    pub fn from_event(event: &TransportEvent) -> Option<Self> {
        if event.method != "Runtime.exceptionThrown" {
            return None;
        }
        event.params.get("exceptionDetails").map(Self::from_details)
    }

    /// Builds from an `exceptionDetails` object, as found in events and evaluate results.
    pub fn from_details(details: &Value) -> Self {
        let text = details
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("Uncaught");
        let description = details
            .pointer("/exception/description")
            .and_then(Value::as_str);
        let message = match description {
            Some(description) if text == "Uncaught" || text.is_empty() => description.to_string(),
            Some(description) => format!("{text} {description}"),
            None => text.to_string(),
        };
        Self {
            message,
            url: details.get("url").and_then(Value::as_str).map(str::to_string),
            line: details.get("lineNumber").and_then(Value::as_u64),
            column: details.get("columnNumber").and_then(Value::as_u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: Value) -> TransportEvent {
        TransportEvent {
            method: method.into(),
            params,
            session_id: None,
        }
    }

    #[test]
    fn renders_mixed_console_arguments() {
        let message = ConsoleMessage::from_event(&event(
            "Runtime.consoleAPICalled",
            json!({
                "type": "warning",
                "args": [
                    { "type": "string", "value": "scrolled" },
                    { "type": "number", "value": 42, "description": "42" },
                    { "type": "object", "subtype": "node", "description": "div#main" },
                    { "type": "undefined" }
                ]
            }),
        ))
        .unwrap();
        assert_eq!(message.level, "warning");
        assert_eq!(message.text, "scrolled 42 div#main undefined");
        assert_eq!(message.first_arg_text(), Some("scrolled"));
    }

    #[test]
    fn decodes_log_entries() {
        let message = ConsoleMessage::from_event(&event(
            "Log.entryAdded",
            json!({ "entry": { "level": "error", "text": "net::ERR_FAILED", "url": "https://x/" } }),
        ))
        .unwrap();
        assert_eq!(message.level, "error");
        assert_eq!(message.text, "net::ERR_FAILED");
        assert!(message.first_arg_text().is_none());
    }

    #[test]
    fn exception_prefers_description_for_uncaught() {
        let info = ExceptionInfo::from_event(&event(
            "Runtime.exceptionThrown",
            json!({
                "exceptionDetails": {
                    "text": "Uncaught",
                    "lineNumber": 3,
                    "exception": { "description": "TypeError: x is undefined" }
                }
            }),
        ))
        .unwrap();
        assert_eq!(info.message, "TypeError: x is undefined");
        assert_eq!(info.line, Some(3));

        let other = ExceptionInfo::from_details(&json!({ "text": "SyntaxError: Unexpected end of input" }));
        assert_eq!(other.message, "SyntaxError: Unexpected end of input");
    }

    #[test]
    fn unrelated_events_are_ignored() {
        assert!(ConsoleMessage::from_event(&event("Page.loadEventFired", json!({}))).is_none());
        assert!(ExceptionInfo::from_event(&event("Page.loadEventFired", json!({}))).is_none());
    }
}
