use lazy_static::lazy_static;
use prometheus::{core::Collector, Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    static ref CLIENT_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "cdp_proxy_client_requests_total",
            "Client requests handled by the proxy"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref UPSTREAM_CONNECTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "cdp_proxy_upstream_connects_total",
            "Upstream target connections opened"
        ),
        &["mode"]
    )
    .unwrap();
    static ref CAPTURED_EVENTS_TOTAL: IntCounter = IntCounter::new(
        "cdp_proxy_captured_events_total",
        "Upstream events written to the journal"
    )
    .unwrap();
    static ref REGISTRY: Registry = {
        let registry = Registry::new();
        cdp_adapter::metrics::register_metrics(&registry);
        register(&registry, CLIENT_REQUESTS_TOTAL.clone());
        register(&registry, UPSTREAM_CONNECTS_TOTAL.clone());
        register(&registry, CAPTURED_EVENTS_TOTAL.clone());
        registry
    };
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register proxy metric");
        }
    }
}

pub(crate) fn record_client_request(ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    CLIENT_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub(crate) fn record_upstream_connect(mode: &str) {
    UPSTREAM_CONNECTS_TOTAL.with_label_values(&[mode]).inc();
}

pub(crate) fn record_captured_event() {
    CAPTURED_EVENTS_TOTAL.inc();
}

/// Prometheus text exposition of adapter and proxy metrics.
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        error!(?err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_exposes_proxy_counters() {
        record_client_request(true);
        record_client_request(false);
        record_upstream_connect("pooled");
        record_captured_event();
        let text = render();
        assert!(text.contains("cdp_proxy_client_requests_total{outcome=\"ok\"}"));
        assert!(text.contains("cdp_proxy_client_requests_total{outcome=\"error\"}"));
        assert!(text.contains("cdp_proxy_upstream_connects_total{mode=\"pooled\"}"));
        assert!(text.contains("cdp_proxy_captured_events_total"));
    }

    #[test]
    fn duplicate_registration_is_tolerated() {
        let registry = Registry::new();
        register(&registry, CAPTURED_EVENTS_TOTAL.clone());
        register(&registry, CAPTURED_EVENTS_TOTAL.clone());
        assert_eq!(registry.gather().len(), 1);
    }
}
