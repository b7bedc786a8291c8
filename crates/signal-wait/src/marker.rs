//! Signal markers: `__sig_<unix-millis>_<10 alphanumerics>__`.

use std::fmt;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

const PREFIX: &str = "__sig_";
const SUFFIX: &str = "__";
const NONCE_LEN: usize = 10;

/// Tag embedded in an injected listener's completion message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SignalMarker(String);

impl SignalMarker {
    pub fn from_parts(millis: i64, nonce: &str) -> Option<Self> {
        let valid = millis >= 0
            && nonce.len() == NONCE_LEN
            && nonce.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| Self(format!("{PREFIX}{millis}_{nonce}{SUFFIX}")))
    }

    /// Finds the first well-formed marker inside `text`.
    pub fn scan(text: &str) -> Option<Self> {
        Self::scan_all(text).next().map(|(marker, _)| marker)
    }

    /// Every well-formed marker in `text`, each with the byte offset just past it.
    pub fn scan_all(text: &str) -> impl Iterator<Item = (Self, usize)> + '_ {
        let mut offset = 0;
        std::iter::from_fn(move || {
            while let Some(found) = text.get(offset..)?.find(PREFIX) {
                let start = offset + found;
                offset = start + PREFIX.len();
                if let Some(marker) = Self::parse_at(&text[start..]) {
                    offset = start + marker.0.len();
                    return Some((marker, offset));
                }
            }
            None
        })
    }

    fn parse_at(text: &str) -> Option<Self> {
        let rest = text.strip_prefix(PREFIX)?;
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let millis: i64 = rest[..digits].parse().ok()?;
        let rest = rest[digits..].strip_prefix('_')?;
        let nonce = rest.get(..NONCE_LEN)?;
        rest[NONCE_LEN..].strip_prefix(SUFFIX)?;
        Self::from_parts(millis, nonce)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The marker as a JavaScript string literal.
    pub fn js_literal(&self) -> String {
        serde_json::Value::String(self.0.clone()).to_string()
    }
}

impl fmt::Display for SignalMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh markers; one marker per wait.
pub trait MarkerGenerator: Send + Sync {
    fn next_marker(&self) -> SignalMarker;
}

/// Wall-clock millis plus a random alphanumeric nonce.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomMarkers;

impl MarkerGenerator for RandomMarkers {
    fn next_marker(&self) -> SignalMarker {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        let millis = Utc::now().timestamp_millis().max(0);
        SignalMarker(format!("{PREFIX}{millis}_{nonce}{SUFFIX}"))
    }
}
