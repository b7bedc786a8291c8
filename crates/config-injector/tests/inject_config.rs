use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::fake::{FakeBrowser, FakeCommand, FakeOutbox, FakeReply, FakeTarget};
use cdp_adapter::{CdpChannel, ConnectOptions};
use config_injector::{
    content_hash, ConfigInjector, ConfigSnapshot, InjectPhase, InjectRequest, ReadinessProbe,
    StorageKeys,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

/// `chrome.storage.local` of a fake extension, driven through the storage bridge expressions.
#[derive(Default)]
struct Storage {
    items: Map<String, Value>,
    writes: usize,
    ready_after: usize,
    ready_polls: usize,
    fail_writes: bool,
    /// Mangles stored content, as a broken extension would.
    truncate_content: bool,
}

fn exception(message: &str) -> FakeReply {
    FakeReply::Result(json!({
        "result": { "type": "object", "subtype": "error" },
        "exceptionDetails": {
            "text": "Uncaught",
            "lineNumber": 2,
            "columnNumber": 4,
            "exception": { "description": message }
        }
    }))
}

fn value(value: Value) -> FakeReply {
    FakeReply::Result(json!({ "result": { "type": "object", "value": value } }))
}

/// Splits `...})("op", {payload})` into its op and payload.
fn bridge_call(expression: &str) -> Option<(String, Value)> {
    let start = expression.rfind("})(\"")? + 4;
    let rest = &expression[start..];
    let (op, args) = rest.split_once("\", ")?;
    let payload = args.strip_suffix(')')?;
    Some((op.to_string(), serde_json::from_str(payload).ok()?))
}

fn balanced(source: &str) -> bool {
    let mut depth: i64 = 0;
    for ch in source.chars() {
        match ch {
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

fn extension(
    storage: Arc<Mutex<Storage>>,
) -> impl Fn(&FakeCommand, &FakeOutbox) -> FakeReply + Send + Sync + 'static {
    move |cmd: &FakeCommand, _: &FakeOutbox| {
        let mut storage = storage.lock();
        match cmd.method.as_str() {
            "Runtime.compileScript" => {
                let source = cmd.params["expression"].as_str().unwrap_or_default();
                if balanced(source) {
                    FakeReply::Result(json!({ "scriptId": "" }))
                } else {
                    FakeReply::Result(json!({
                        "exceptionDetails": {
                            "text": "Uncaught",
                            "lineNumber": 0,
                            "columnNumber": 12,
                            "exception": { "description": "SyntaxError: Unexpected end of input" }
                        }
                    }))
                }
            }
            "Runtime.evaluate" => {
                let expression = cmd.params["expression"].as_str().unwrap_or_default();
                let Some((op, payload)) = bridge_call(expression) else {
                    return value(json!(expression == "window.configLoaded"));
                };
                match op.as_str() {
                    "set" => {
                        if storage.fail_writes {
                            return exception("Error: QUOTA_BYTES quota exceeded");
                        }
                        storage.writes += 1;
                        let truncate = storage.truncate_content;
                        for (key, item) in payload["items"].as_object().cloned().unwrap_or_default() {
                            let item = match (&item, truncate) {
                                (Value::String(text), true) if key == "snippets" => {
                                    json!(text.chars().take(3).collect::<String>())
                                }
                                _ => item,
                            };
                            storage.items.insert(key, item);
                        }
                        value(json!({ "ok": true }))
                    }
                    "get" => {
                        let mut found = Map::new();
                        for key in payload["keys"].as_array().cloned().unwrap_or_default() {
                            let key = key.as_str().unwrap_or_default().to_string();
                            if let Some(item) = storage.items.get(&key) {
                                found.insert(key, item.clone());
                            }
                        }
                        value(Value::Object(found))
                    }
                    "ready" => {
                        storage.ready_polls += 1;
                        let key = payload["key"].as_str().unwrap_or_default();
                        let stored = storage
                            .items
                            .get(key)
                            .map(Value::is_string)
                            .unwrap_or(false);
                        value(json!(stored && storage.ready_polls > storage.ready_after))
                    }
                    other => exception(&format!("Error: unknown storage op {other}")),
                }
            }
            _ => FakeReply::Result(json!({})),
        }
    }
}

struct Fixture {
    browser: FakeBrowser,
    injector: ConfigInjector,
    storage: Arc<Mutex<Storage>>,
    dir: TempDir,
}

impl Fixture {
    async fn start(storage: Storage) -> Self {
        let browser = FakeBrowser::start().await;
        browser.add_target(FakeTarget::service_worker(
            "SW",
            "chrome-extension://abcdefghijklmnop/background.js",
        ));
        let storage = Arc::new(Mutex::new(storage));
        browser.set_behavior("SW", extension(Arc::clone(&storage)));
        let channel = CdpChannel::connect(&browser.ws_url("SW"), &ConnectOptions::default())
            .await
            .unwrap();
        Self {
            browser,
            injector: ConfigInjector::new(channel),
            storage,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write_source(&self, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn stop(self) {
        self.browser.shutdown().await;
    }
}

#[tokio::test]
async fn valid_config_is_stored_and_verified() {
    let fixture = Fixture::start(Storage::default()).await;
    let content = "const snippets = [{ name: 'hello', code: 'console.log(1)' }];\n";
    let source = fixture.write_source("config.js", content.as_bytes());

    let report = fixture
        .injector
        .inject(&InjectRequest::new(&source, "/home/tester/config.js").advanced(true))
        .await;
    assert!(report.success, "report: {report:?}");
    assert_eq!(report.phase, InjectPhase::Succeeded);
    assert!(report.validate.syntax_valid);
    assert_eq!(report.store.as_ref().unwrap().hash, content_hash(content.as_bytes()));
    let verify = report.verify.as_ref().unwrap();
    assert!(verify.hash_matches && verify.path_matches && verify.advanced_matches);
    assert_eq!(fixture.storage.lock().writes, 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["validate"]["syntaxValid"], true);
    assert_eq!(json["verify"]["expected"], json["verify"]["actual"]);
    assert!(json.get("error").is_none());
    fixture.stop().await;
}

#[tokio::test]
async fn syntax_error_never_reaches_storage() {
    let fixture = Fixture::start(Storage::default()).await;
    let source = fixture.write_source("broken.js", b"function broken() { return {;\n");

    let report = fixture
        .injector
        .inject(&InjectRequest::new(&source, "/tmp/broken.js"))
        .await;
    assert!(!report.success);
    assert!(!report.validate.syntax_valid);
    assert_eq!(report.failed_phase(), Some(InjectPhase::Validate));
    assert!(report
        .error
        .as_ref()
        .unwrap()
        .message
        .contains("SyntaxError: Unexpected end of input at 1:13"));
    assert!(report.store.is_none());
    assert_eq!(fixture.storage.lock().writes, 0);

    let compiled = fixture
        .browser
        .commands("SW")
        .into_iter()
        .find(|cmd| cmd.method == "Runtime.compileScript")
        .unwrap();
    assert_eq!(compiled.params["persistScript"], false);
    fixture.stop().await;
}

#[tokio::test]
async fn missing_and_non_utf8_sources_fail_validation() {
    let fixture = Fixture::start(Storage::default()).await;

    let missing = fixture.dir.path().join("nope.js");
    let report = fixture
        .injector
        .inject(&InjectRequest::new(&missing, "/tmp/nope.js"))
        .await;
    assert_eq!(report.failed_phase(), Some(InjectPhase::Validate));
    assert!(report.error.as_ref().unwrap().message.contains("nope.js"));

    let binary = fixture.write_source("binary.js", &[0x66, 0x6f, 0xff, 0xfe]);
    let report = fixture
        .injector
        .inject(&InjectRequest::new(&binary, "/tmp/binary.js"))
        .await;
    assert_eq!(report.failed_phase(), Some(InjectPhase::Validate));
    assert!(report.error.as_ref().unwrap().message.contains("UTF-8"));
    assert_eq!(fixture.storage.lock().writes, 0);
    fixture.stop().await;
}

#[tokio::test]
async fn storage_write_error_is_reported_as_store_failure() {
    let fixture = Fixture::start(Storage {
        fail_writes: true,
        ..Storage::default()
    })
    .await;
    let source = fixture.write_source("config.js", b"const a = 1;");

    let report = fixture
        .injector
        .inject(&InjectRequest::new(&source, "/tmp/config.js"))
        .await;
    assert_eq!(report.failed_phase(), Some(InjectPhase::Store));
    assert!(report.validate.syntax_valid);
    assert!(report.error.as_ref().unwrap().message.contains("QUOTA_BYTES"));
    fixture.stop().await;
}

#[tokio::test]
async fn readiness_is_polled_until_true() {
    let fixture = Fixture::start(Storage {
        ready_after: 3,
        ..Storage::default()
    })
    .await;
    let source = fixture.write_source("config.js", b"const a = 1;");

    let report = fixture
        .injector
        .inject(&InjectRequest::new(&source, "/tmp/config.js").ready_timeout(Duration::from_secs(2)))
        .await;
    assert!(report.success, "report: {report:?}");
    let ready = report.ready.unwrap();
    assert!(ready.ready);
    assert_eq!(ready.polls, 4);
    assert!(ready.elapsed_ms >= 300);
    fixture.stop().await;
}

#[tokio::test]
async fn readiness_timeout_fails_await_ready() {
    let fixture = Fixture::start(Storage {
        ready_after: usize::MAX,
        ..Storage::default()
    })
    .await;
    let source = fixture.write_source("config.js", b"const a = 1;");

    let report = fixture
        .injector
        .inject(
            &InjectRequest::new(&source, "/tmp/config.js").ready_timeout(Duration::from_millis(250)),
        )
        .await;
    assert_eq!(report.failed_phase(), Some(InjectPhase::AwaitReady));
    let ready = report.ready.unwrap();
    assert!(!ready.ready);
    assert!(ready.polls >= 2);
    assert!(report.verify.is_none());
    fixture.stop().await;
}

#[tokio::test]
async fn custom_readiness_expression_is_evaluated() {
    let fixture = Fixture::start(Storage::default()).await;
    let source = fixture.write_source("config.js", b"const a = 1;");

    let report = fixture
        .injector
        .inject(
            &InjectRequest::new(&source, "/tmp/config.js")
                .readiness(ReadinessProbe::Expression("window.configLoaded".into())),
        )
        .await;
    assert!(report.success, "report: {report:?}");
    assert_eq!(report.ready.unwrap().polls, 1);
    fixture.stop().await;
}

#[tokio::test]
async fn mangled_storage_fails_verification_with_both_sides() {
    let fixture = Fixture::start(Storage {
        truncate_content: true,
        ..Storage::default()
    })
    .await;
    let content = "const longer = 'content';";
    let source = fixture.write_source("config.js", content.as_bytes());

    let report = fixture
        .injector
        .inject(&InjectRequest::new(&source, "/tmp/config.js"))
        .await;
    assert_eq!(report.failed_phase(), Some(InjectPhase::PostVerify));
    let verify = report.verify.unwrap();
    assert!(!verify.hash_matches);
    assert!(verify.path_matches);
    assert_eq!(verify.expected.content_hash, Some(content_hash(content.as_bytes())));
    assert_eq!(verify.actual.content_hash, Some(content_hash(b"con")));
    fixture.stop().await;
}

#[tokio::test]
async fn stored_hash_and_path_round_trip() {
    let fixture = Fixture::start(Storage::default()).await;
    let cases = [
        ("a.js", "let x = 1;", "/srv/a.js"),
        ("b.js", "const s = [{ key: 'j', action: 'scrollDown' }];", "C:\\Users\\t\\b.js"),
        ("c.js", "// ünïcödé ✓\nconst t = `${1 + 1}`;", "/tmp/ü/c.js"),
        ("d.js", "(() => { return [1, 2, 3].map((n) => n * 2); })();", ""),
    ];
    for (name, content, path) in cases {
        let source = fixture.write_source(name, content.as_bytes());
        let report = fixture
            .injector
            .inject(&InjectRequest::new(&source, path))
            .await;
        assert!(report.success, "{name}: {report:?}");

        let snapshot = fixture.injector.read_snapshot().await.unwrap();
        assert_eq!(
            snapshot,
            ConfigSnapshot {
                content_hash: Some(content_hash(content.as_bytes())),
                storage_path: path.to_string(),
                advanced: false,
            }
        );
    }
    fixture.stop().await;
}

#[tokio::test]
async fn empty_script_round_trips() {
    let fixture = Fixture::start(Storage::default()).await;
    let source = fixture.write_source("empty.js", b"");

    let report = fixture
        .injector
        .inject(&InjectRequest::new(&source, "/srv/empty.js").ready_timeout(Duration::from_millis(300)))
        .await;
    assert!(report.success, "report: {report:?}");
    assert_eq!(report.ready.as_ref().unwrap().polls, 1);
    let verify = report.verify.unwrap();
    assert_eq!(verify.actual.content_hash, Some(content_hash(b"")));
    assert_eq!(
        fixture.injector.read_snapshot().await.unwrap(),
        ConfigSnapshot {
            content_hash: Some(content_hash(b"")),
            storage_path: "/srv/empty.js".into(),
            advanced: false,
        }
    );

    fixture.injector.clear().await.unwrap();
    assert_eq!(
        fixture.injector.read_snapshot().await.unwrap(),
        ConfigSnapshot::default()
    );
    fixture.stop().await;
}

#[tokio::test]
async fn clear_resets_all_three_keys() {
    let fixture = Fixture::start(Storage::default()).await;
    let source = fixture.write_source("config.js", b"const a = 1;");
    let report = fixture
        .injector
        .inject(&InjectRequest::new(&source, "/tmp/config.js").advanced(true))
        .await;
    assert!(report.success);

    fixture.injector.clear().await.unwrap();
    assert_eq!(
        fixture.injector.read_snapshot().await.unwrap(),
        ConfigSnapshot::default()
    );
    let items = fixture.storage.lock().items.clone();
    assert_eq!(items["snippets"], "");
    assert_eq!(items["localPath"], "");
    assert_eq!(items["showAdvanced"], false);
    fixture.stop().await;
}

#[tokio::test]
async fn custom_storage_keys_are_used() {
    let fixture = Fixture::start(Storage::default()).await;
    let Fixture {
        browser,
        injector,
        storage,
        dir,
    } = fixture;
    let injector = injector.with_keys(StorageKeys {
        content: "userScript".into(),
        path: "scriptPath".into(),
        advanced: "expert".into(),
    });
    let source = dir.path().join("config.js");
    std::fs::write(&source, "const a = 1;").unwrap();

    let report = injector
        .inject(&InjectRequest::new(&source, "/tmp/config.js"))
        .await;
    assert!(report.success, "report: {report:?}");
    let items = storage.lock().items.clone();
    assert_eq!(items["scriptPath"], "/tmp/config.js");
    assert!(!items.contains_key("snippets"));
    browser.shutdown().await;
}
