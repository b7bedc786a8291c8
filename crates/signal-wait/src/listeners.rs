//! In-page listener scripts.
//!
//! Every script is rendered inside the same scaffold: an `emit(status, detail)` function guarded
//! by a `done` flag, a timer that reports `timeout` with the listener's last `snapshot()`, and a
//! `cleanup` hook that both paths run before logging `marker + JSON.stringify({status, detail})`.
//! A listener therefore reports exactly once, whichever path fires first.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::marker::SignalMarker;

/// A native event listener to attach in the page.
///
/// `body` runs inside the scaffold. It may call `emit('ok', detail)`, and should assign
/// `cleanup` (detach the listener) and `snapshot` (detail reported on timeout).
pub trait ListenerScript: Send + Sync {
    fn name(&self) -> &'static str;
    fn body(&self) -> String;
}

/// Renders `script` as a self-contained expression that returns the marker once attached.
pub fn render_listener(
    script: &dyn ListenerScript,
    marker: &SignalMarker,
    timeout: Duration,
) -> String {
    format!(
        "(() => {{
  const marker = {marker};
  let done = false;
  let timer = null;
  let cleanup = () => {{}};
  let snapshot = () => null;
  const emit = (status, detail) => {{
    if (done) {{ return; }}
    done = true;
    if (timer !== null) {{ clearTimeout(timer); }}
    try {{ cleanup(); }} catch (_) {{}}
    console.log(marker + JSON.stringify({{ status, detail }}));
  }};
  // listener: {name}
{body}
  if (!done) {{
    timer = setTimeout(() => {{
      let detail = null;
      try {{ detail = snapshot(); }} catch (_) {{}}
      emit('timeout', detail);
    }}, {timeout_ms});
  }}
  return marker;
}})()",
        marker = marker.js_literal(),
        name = script.name(),
        body = script.body(),
        timeout_ms = timeout.as_millis(),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn is_vertical(self) -> bool {
        matches!(self, ScrollDirection::Up | ScrollDirection::Down)
    }

    /// +1 when the offset grows in this direction, -1 otherwise.
    pub fn sign(self) -> i8 {
        match self {
            ScrollDirection::Down | ScrollDirection::Right => 1,
            ScrollDirection::Up | ScrollDirection::Left => -1,
        }
    }

    fn offset_js(self) -> &'static str {
        if self.is_vertical() {
            "window.scrollY || (scroller ? scroller.scrollTop : 0) || 0"
        } else {
            "window.scrollX || (scroller ? scroller.scrollLeft : 0) || 0"
        }
    }
}

impl std::str::FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(format!("unknown scroll direction '{other}'")),
        }
    }
}

/// Reports once the page has scrolled at least `min_delta` pixels in `direction`.
#[derive(Clone, Debug, PartialEq)]
pub struct ScrollListener {
    pub direction: ScrollDirection,
    pub min_delta: f64,
    /// Offset captured before the listener was attached. `None` reads it at attach time,
    /// which misses any scroll already in flight.
    pub baseline: Option<f64>,
}

impl ListenerScript for ScrollListener {
    fn name(&self) -> &'static str {
        "scroll"
    }

    fn body(&self) -> String {
        let baseline = match self.baseline {
            Some(value) => format!("{value}"),
            None => "read()".to_string(),
        };
        format!(
            "  const scroller = document.scrollingElement || document.documentElement || document.body;
  const read = () => Math.round({offset});
  const baseline = {baseline};
  snapshot = () => {{
    const current = read();
    return {{ baseline, final: current, delta: current - baseline }};
  }};
  const onScroll = () => {{
    const state = snapshot();
    if (state.delta * {sign} >= {min_delta}) {{ emit('ok', state); }}
  }};
  window.addEventListener('scroll', onScroll, {{ passive: true }});
  cleanup = () => window.removeEventListener('scroll', onScroll);
  onScroll();",
            offset = self.direction.offset_js(),
            baseline = baseline,
            sign = self.direction.sign(),
            min_delta = self.min_delta,
        )
    }
}

/// Reports after a DOM mutation leaves `predicate` (a JavaScript expression) truthy.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationListener {
    pub predicate: String,
}

impl ListenerScript for MutationListener {
    fn name(&self) -> &'static str {
        "mutation"
    }

    fn body(&self) -> String {
        format!(
            "  const check = () => {{ try {{ return Boolean({predicate}); }} catch (_) {{ return false; }} }};
  let mutations = 0;
  snapshot = () => ({{ matched: check(), mutations }});
  const observer = new MutationObserver((records) => {{
    mutations += records.length;
    if (check()) {{ emit('ok', snapshot()); }}
  }});
  observer.observe(document.documentElement || document, {{ childList: true, subtree: true, attributes: true, characterData: true }});
  cleanup = () => observer.disconnect();",
            predicate = self.predicate,
        )
    }
}

/// Reports the next `keyup`, optionally only for a given `key` or `code`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyupListener {
    pub filter: Option<String>,
}

impl ListenerScript for KeyupListener {
    fn name(&self) -> &'static str {
        "keyup"
    }

    fn body(&self) -> String {
        let wanted = match &self.filter {
            Some(filter) => serde_json::Value::String(filter.clone()).to_string(),
            None => "null".to_string(),
        };
        format!(
            "  const wanted = {wanted};
  let last = null;
  snapshot = () => ({{ key: last ? last.key : null, code: last ? last.code : null }});
  const onKeyup = (event) => {{
    last = event;
    if (wanted === null || event.key === wanted || event.code === wanted) {{
      emit('ok', {{ key: event.key, code: event.code }});
    }}
  }};
  document.addEventListener('keyup', onKeyup, true);
  cleanup = () => document.removeEventListener('keyup', onKeyup, true);",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> SignalMarker {
        SignalMarker::from_parts(42, "AAAAAAAAAA").unwrap()
    }

    #[test]
    fn scaffold_reports_once_on_either_path() {
        let script = render_listener(&KeyupListener::default(), &marker(), Duration::from_millis(750));
        assert!(script.contains("const marker = \"__sig_42_AAAAAAAAAA__\";"));
        assert!(script.contains("if (done) { return; }"));
        assert!(script.contains("clearTimeout(timer)"));
        assert!(script.contains("emit('timeout', detail);"));
        assert!(script.contains("}, 750);"));
        assert!(script.trim_end().ends_with("})()"));
    }

    #[test]
    fn scroll_body_uses_supplied_baseline() {
        let listener = ScrollListener {
            direction: ScrollDirection::Down,
            min_delta: 20.0,
            baseline: Some(0.0),
        };
        let body = listener.body();
        assert!(body.contains("const baseline = 0;"));
        assert!(body.contains("state.delta * 1 >= 20"));
        assert!(body.contains("scrollY"));
    }

    #[test]
    fn scroll_body_falls_back_to_attach_time_baseline() {
        let listener = ScrollListener {
            direction: ScrollDirection::Left,
            min_delta: 5.0,
            baseline: None,
        };
        let body = listener.body();
        assert!(body.contains("const baseline = read();"));
        assert!(body.contains("state.delta * -1 >= 5"));
        assert!(body.contains("scrollX"));
    }

    #[test]
    fn keyup_filter_is_quoted() {
        let listener = KeyupListener {
            filter: Some("Escape".into()),
        };
        assert!(listener.body().contains("const wanted = \"Escape\";"));
        assert!(KeyupListener::default().body().contains("const wanted = null;"));
    }

    #[test]
    fn directions_parse_case_insensitively() {
        assert_eq!("Down".parse::<ScrollDirection>().unwrap(), ScrollDirection::Down);
        assert!("sideways".parse::<ScrollDirection>().is_err());
    }
}
