//! Storage access from the extension's background context.

use cdp_adapter::{AdapterError, CdpChannel, EvalOptions};
use serde_json::{json, Map, Value};

use crate::model::StorageKeys;

const BRIDGE_JS: &str = "(async (op, payload) => {
  const area = chrome.storage.local;
  if (op === 'set') {
    await area.set(payload.items);
    return { ok: true };
  }
  if (op === 'get') {
    return await area.get(payload.keys);
  }
  if (op === 'ready') {
    const stored = await area.get([payload.key]);
    const value = stored[payload.key];
    return typeof value === 'string';
  }
  throw new Error('unknown storage op ' + op);
})";

/// Renders a bridge call for `op` with a JSON `payload`.
pub fn render_call(op: &str, payload: &Value) -> String {
    format!("{BRIDGE_JS}({}, {payload})", Value::String(op.to_string()))
}

pub(crate) struct StorageBridge<'a> {
    channel: &'a CdpChannel,
    keys: &'a StorageKeys,
}

impl<'a> StorageBridge<'a> {
    pub fn new(channel: &'a CdpChannel, keys: &'a StorageKeys) -> Self {
        Self { channel, keys }
    }

    /// One `chrome.storage.local.set` carrying all three keys.
    pub async fn write(&self, content: &str, path: &str, advanced: bool) -> Result<(), AdapterError> {
        let mut items = Map::new();
        items.insert(self.keys.content.clone(), json!(content));
        items.insert(self.keys.path.clone(), json!(path));
        items.insert(self.keys.advanced.clone(), json!(advanced));
        self.call("set", json!({ "items": items })).await?;
        Ok(())
    }

    pub async fn read(&self) -> Result<Map<String, Value>, AdapterError> {
        let keys = [&self.keys.content, &self.keys.path, &self.keys.advanced];
        let value = self.call("get", json!({ "keys": keys })).await?;
        Ok(match value {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }

    pub async fn content_ready(&self) -> Result<bool, AdapterError> {
        let value = self.call("ready", json!({ "key": self.keys.content })).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn call(&self, op: &str, payload: Value) -> Result<Value, AdapterError> {
        self.channel
            .evaluate(&render_call(op, &payload), EvalOptions::awaiting())
            .await
    }
}
