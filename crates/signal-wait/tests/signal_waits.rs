use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::fake::{FakeBrowser, FakeCommand, FakeOutbox, FakeReply, FakeTarget};
use cdp_adapter::{dispatch_key, AdapterErrorKind, CdpChannel, ConnectOptions, KeyStroke};
use parking_lot::Mutex;
use serde_json::{json, Value};
use signal_wait::{
    arm_listener, prepare_scroll_wait, send_key_and_wait_for_scroll, wait_for_keyup,
    wait_for_mutation, wait_for_scroll_delta, KeyupDetail, KeyupListener, MarkerGenerator,
    RandomMarkers, ScrollExpectation, ScrollOutcome, SignalMarker, WaitError,
};

/// Page model: `j` scrolls down by 50px, `k` up by 50px; injected listeners are tracked by kind.
#[derive(Default)]
struct PageState {
    scroll_y: f64,
    scroll_listener: Option<(SignalMarker, f64, f64)>,
    keyup_listener: Option<(SignalMarker, Option<String>)>,
}

fn report(outbox: &FakeOutbox, marker: &SignalMarker, status: &str, detail: Value) {
    let payload = json!({ "status": status, "detail": detail });
    outbox.emit_console("log", &[&format!("{marker}{payload}")]);
}

fn number_after(expression: &str, prefix: &str, terminator: char) -> Option<f64> {
    let start = expression.find(prefix)? + prefix.len();
    let rest = &expression[start..];
    let end = rest.find(terminator)?;
    rest[..end].trim().parse().ok()
}

fn scrolling_page(
    state: Arc<Mutex<PageState>>,
) -> impl Fn(&FakeCommand, &FakeOutbox) -> FakeReply + Send + Sync + 'static {
    move |cmd: &FakeCommand, outbox: &FakeOutbox| {
        let mut page = state.lock();
        match cmd.method.as_str() {
            "Runtime.evaluate" => {
                let expression = cmd.params["expression"].as_str().unwrap_or_default();
                if expression.contains("// listener: scroll") {
                    let marker = SignalMarker::scan(expression).unwrap();
                    let baseline =
                        number_after(expression, "const baseline = ", ';').unwrap_or(page.scroll_y);
                    let min_delta = number_after(expression, ">= ", ')').unwrap_or(0.0);
                    page.scroll_listener = Some((marker.clone(), baseline, min_delta));
                    FakeReply::Result(json!({ "result": { "type": "string", "value": marker.as_str() } }))
                } else if expression.contains("// listener: keyup") {
                    let marker = SignalMarker::scan(expression).unwrap();
                    let filter = expression
                        .split("const wanted = ")
                        .nth(1)
                        .and_then(|rest| rest.split(';').next())
                        .and_then(|literal| serde_json::from_str::<Option<String>>(literal).ok())
                        .flatten();
                    page.keyup_listener = Some((marker.clone(), filter));
                    FakeReply::Result(json!({ "result": { "type": "string", "value": marker.as_str() } }))
                } else {
                    FakeReply::Result(json!({
                        "result": { "type": "object", "value": { "x": 0, "y": page.scroll_y } }
                    }))
                }
            }
            "Input.dispatchKeyEvent" => {
                let kind = cmd.params["type"].as_str().unwrap_or_default();
                let key = cmd.params["key"].as_str().unwrap_or_default().to_string();
                let code = cmd.params["code"].as_str().unwrap_or_default().to_string();
                if kind == "keyDown" {
                    match key.as_str() {
                        "j" => page.scroll_y += 50.0,
                        "k" => page.scroll_y = (page.scroll_y - 50.0).max(0.0),
                        _ => {}
                    }
                    if let Some((marker, baseline, min_delta)) = page.scroll_listener.clone() {
                        let delta = page.scroll_y - baseline;
                        if delta.abs() >= min_delta {
                            report(
                                outbox,
                                &marker,
                                "ok",
                                json!({ "baseline": baseline, "final": page.scroll_y, "delta": delta }),
                            );
                            page.scroll_listener = None;
                        }
                    }
                }
                if kind == "keyUp" {
                    if let Some((marker, filter)) = page.keyup_listener.clone() {
                        let wanted = filter.map(|f| f == key || f == code).unwrap_or(true);
                        if wanted {
                            report(outbox, &marker, "ok", json!({ "key": key, "code": code }));
                            page.keyup_listener = None;
                        }
                    }
                }
                FakeReply::Result(json!({}))
            }
            _ => FakeReply::Result(json!({})),
        }
    }
}

async fn scrolling_fixture() -> (FakeBrowser, CdpChannel, Arc<Mutex<PageState>>) {
    let browser = FakeBrowser::start().await;
    browser.add_target(FakeTarget::page("P", "https://example.com/list", "List"));
    let state = Arc::new(Mutex::new(PageState::default()));
    browser.set_behavior("P", scrolling_page(Arc::clone(&state)));
    let channel = CdpChannel::connect(&browser.ws_url("P"), &ConnectOptions::default())
        .await
        .unwrap();
    (browser, channel, state)
}

#[tokio::test]
async fn key_press_scroll_reports_baseline_final_and_delta() {
    let (browser, channel, _) = scrolling_fixture().await;

    let outcome = send_key_and_wait_for_scroll(
        &channel,
        "j",
        ScrollExpectation::down(20.0),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    assert_eq!(
        outcome,
        ScrollOutcome {
            baseline: 0.0,
            final_position: 50.0,
            delta: 50.0
        }
    );

    // Baseline read, then listener attached, then the key goes out.
    let methods: Vec<String> = browser
        .commands("P")
        .into_iter()
        .filter(|cmd| cmd.method != "Runtime.enable" && cmd.method != "Log.enable")
        .map(|cmd| {
            let expression = cmd.params["expression"].as_str().unwrap_or_default();
            if expression.contains("// listener: scroll") {
                "listener".to_string()
            } else {
                cmd.method
            }
        })
        .collect();
    assert_eq!(
        methods,
        vec![
            "Runtime.evaluate",
            "listener",
            "Input.dispatchKeyEvent",
            "Input.dispatchKeyEvent",
            "Input.dispatchKeyEvent"
        ]
    );

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn upward_scroll_reports_negative_delta() {
    let (browser, channel, state) = scrolling_fixture().await;
    state.lock().scroll_y = 100.0;

    let outcome = send_key_and_wait_for_scroll(
        &channel,
        "k",
        ScrollExpectation::up(20.0),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    assert_eq!(outcome.baseline, 100.0);
    assert_eq!(outcome.final_position, 50.0);
    assert_eq!(outcome.delta, -50.0);

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn scroll_immediately_after_prepare_is_never_missed() {
    let (browser, channel, _) = scrolling_fixture().await;

    for round in 0..20 {
        let pending = prepare_scroll_wait(
            &channel,
            &RandomMarkers,
            ScrollExpectation::down(10.0),
            Some(0.0),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        let payload = json!({ "status": "ok", "detail": { "baseline": 0, "final": round + 10, "delta": round + 10 } });
        browser.emit_console("P", "log", &format!("{}{payload}", pending.marker()));

        let outcome = pending.wait().await.unwrap();
        assert_eq!(outcome.delta, f64::from(round + 10));
    }
    assert_eq!(channel.pending_observers(), 0);

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn unrelated_console_traffic_does_not_satisfy_a_wait() {
    let (browser, channel, _) = scrolling_fixture().await;

    let pending = prepare_scroll_wait(
        &channel,
        &RandomMarkers,
        ScrollExpectation::down(10.0),
        Some(0.0),
        Duration::from_millis(300),
    )
    .await
    .unwrap();
    browser.emit_console("P", "log", "scrolled!");
    let stale = RandomMarkers.next_marker();
    browser.emit_console(
        "P",
        "log",
        &format!("{stale}{}", json!({ "status": "ok", "detail": { "baseline": 0, "final": 9, "delta": 9 } })),
    );
    browser.emit_console(
        "P",
        "log",
        &format!("{}{}", pending.marker(), json!({ "status": "ok", "detail": { "baseline": 0, "final": 30, "delta": 30 } })),
    );

    assert_eq!(pending.wait().await.unwrap().delta, 30.0);
    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn in_page_timeout_surfaces_as_condition_timeout() {
    let browser = FakeBrowser::start().await;
    browser.add_target(FakeTarget::page("P", "https://example.com/", "Still"));
    browser.set_behavior("P", |cmd: &FakeCommand, outbox: &FakeOutbox| {
        let expression = cmd.params["expression"].as_str().unwrap_or_default();
        if let Some(marker) = SignalMarker::scan(expression) {
            report(outbox, &marker, "timeout", json!({ "baseline": 0, "final": 10, "delta": 10 }));
            return FakeReply::Result(json!({ "result": { "type": "string", "value": marker.as_str() } }));
        }
        if cmd.method == "Runtime.evaluate" {
            return FakeReply::Result(json!({ "result": { "type": "object", "value": { "x": 0, "y": 0 } } }));
        }
        FakeReply::Result(json!({}))
    });
    let channel = CdpChannel::connect(&browser.ws_url("P"), &ConnectOptions::default())
        .await
        .unwrap();

    let err = wait_for_scroll_delta(
        &channel,
        &RandomMarkers,
        ScrollExpectation::down(20.0),
        Duration::from_millis(500),
    )
    .await
    .unwrap_err();
    match err {
        WaitError::ConditionTimeout { detail, .. } => assert_eq!(detail["delta"], 10),
        other => panic!("expected condition timeout, got {other:?}"),
    }

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn silent_page_hits_the_outer_bound() {
    let browser = FakeBrowser::start().await;
    browser.add_target(FakeTarget::page("P", "https://example.com/", "Silent"));
    browser.set_behavior("P", |_: &FakeCommand, _: &FakeOutbox| {
        FakeReply::Result(json!({ "result": { "type": "undefined" } }))
    });
    let channel = CdpChannel::connect(&browser.ws_url("P"), &ConnectOptions::default())
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = wait_for_mutation(
        &channel,
        &RandomMarkers,
        "document.querySelector('.done') !== null",
        Duration::from_millis(100),
    )
    .await
    .unwrap_err();
    assert!(err.is_timeout());
    match err {
        WaitError::SignalTimeout { bound_ms, marker } => {
            assert_eq!(bound_ms, 1_100);
            assert!(marker.starts_with("__sig_"));
        }
        other => panic!("expected signal timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(1_000));
    assert_eq!(channel.pending_observers(), 0);

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn mutation_detail_is_decoded() {
    let browser = FakeBrowser::start().await;
    browser.add_target(FakeTarget::page("P", "https://example.com/", "Dynamic"));
    browser.set_behavior("P", |cmd: &FakeCommand, outbox: &FakeOutbox| {
        let expression = cmd.params["expression"].as_str().unwrap_or_default();
        if expression.contains("// listener: mutation") {
            assert!(expression.contains("Boolean(document.title === 'ready')"));
            let marker = SignalMarker::scan(expression).unwrap();
            report(outbox, &marker, "ok", json!({ "matched": true, "mutations": 3 }));
        }
        FakeReply::Result(json!({}))
    });
    let channel = CdpChannel::connect(&browser.ws_url("P"), &ConnectOptions::default())
        .await
        .unwrap();

    let detail = wait_for_mutation(
        &channel,
        &RandomMarkers,
        "document.title === 'ready'",
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert!(detail.matched);
    assert_eq!(detail.mutations, 3);

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn keyup_wait_honours_filter() {
    let (browser, channel, state) = scrolling_fixture().await;

    let waiting = wait_for_keyup(&channel, &RandomMarkers, Some("Escape"), Duration::from_secs(2));
    let typing = async {
        while state.lock().keyup_listener.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        dispatch_key(&channel, &KeyStroke::parse("j").unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        dispatch_key(&channel, &KeyStroke::parse("Escape").unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
    };
    let (detail, ()) = tokio::join!(waiting, typing);
    assert_eq!(
        detail.unwrap(),
        KeyupDetail {
            key: "Escape".into(),
            code: "Escape".into()
        }
    );

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn armed_listener_catches_key_dispatched_afterwards() {
    let (browser, channel, _) = scrolling_fixture().await;

    let pending = arm_listener::<KeyupDetail>(
        &channel,
        &RandomMarkers,
        &KeyupListener::default(),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    dispatch_key(&channel, &KeyStroke::parse("j").unwrap(), Duration::from_secs(1))
        .await
        .unwrap();
    let detail = pending.wait().await.unwrap();
    assert_eq!(detail.key, "j");
    assert_eq!(detail.code, "KeyJ");

    channel.close().await;
    browser.shutdown().await;
}

#[tokio::test]
async fn failed_injection_releases_the_observer() {
    let browser = FakeBrowser::start().await;
    browser.add_target(FakeTarget::page("P", "https://example.com/", "Strict"));
    browser.set_behavior("P", |cmd: &FakeCommand, _: &FakeOutbox| {
        if cmd.method == "Runtime.evaluate" {
            FakeReply::Result(json!({
                "result": { "type": "object", "subtype": "error" },
                "exceptionDetails": { "text": "Uncaught", "exception": { "description": "EvalError: blocked by CSP" } }
            }))
        } else {
            FakeReply::Result(json!({}))
        }
    });
    let channel = CdpChannel::connect(&browser.ws_url("P"), &ConnectOptions::default())
        .await
        .unwrap();

    let err = wait_for_keyup(&channel, &RandomMarkers, None, Duration::from_secs(1))
        .await
        .unwrap_err();
    match err {
        WaitError::Adapter(inner) => assert!(inner.is(AdapterErrorKind::Remote)),
        other => panic!("expected adapter error, got {other:?}"),
    }
    assert_eq!(channel.pending_observers(), 0);

    channel.close().await;
    browser.shutdown().await;
}
