use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::harness::{join, spawn_wire_server, success, Debuggee};
use lumen_config::{ConfigError, LumenConfig};
use lumen_dap::demo::DemoRuntime;
use lumen_dap::{DebugEngine, EngineOptions, SuspendCoordinator};
use serde_json::json;

const JOB: &str = "/app/job.src";
const JOB_SRC: &str = "let n = 1\nprint n\n";

fn debuggee_from(config: &LumenConfig) -> Debuggee {
    let options = EngineOptions::from_config(config);
    let coordinator = Arc::new(SuspendCoordinator::new(true));
    let runtime = DemoRuntime::new(coordinator.clone(), options.case_sensitive);
    let engine = Arc::new(DebugEngine::new(runtime.clone(), coordinator, options));
    Debuggee { runtime, engine }
}

#[test]
fn engine_options_follow_the_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[dap]
secret = "file-secret"

[inspection]
pin_cache_size = 3
pin_ttl_secs = 5
reclaim_interval_ms = 250

[paths]
case_sensitive = false
"#
    )
    .unwrap();

    let config = LumenConfig::load_from_path(file.path()).unwrap();
    let options = EngineOptions::from_config(&config);
    assert_eq!(options.expected_secret.as_deref(), Some("file-secret"));
    assert_eq!(options.pin_cache_size, 3);
    assert_eq!(options.pin_ttl, Duration::from_secs(5));
    assert_eq!(options.reclaim_interval, Duration::from_millis(250));
    assert!(!options.case_sensitive);
}

#[test]
fn parse_errors_do_not_quote_the_file() {
    let err = LumenConfig::from_toml_str("[dap]\nsecret = \"hunter2\"\nport = \"nope\"\n")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
    assert!(!err.to_string().contains("hunter2"), "{err}");
}

#[tokio::test]
async fn configured_secret_and_path_case_apply_to_sessions() {
    let config = LumenConfig::from_toml_str(
        "[dap]\nsecret = \"file-secret\"\n\n[paths]\ncase_sensitive = false\n",
    )
    .unwrap();
    let debuggee = debuggee_from(&config);
    debuggee.runtime.load(JOB, JOB_SRC).unwrap();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    let resp = client.attach_with(json!({ "secret": "file-secret" })).await;
    assert!(success(&resp), "{resp}");
    client.wait_for_event("initialized").await;

    let resp = client.set_breakpoints("/APP/Job.src", &[2]).await;
    assert_eq!(resp.pointer("/body/breakpoints/0/verified"), Some(&json!(true)));

    let worker = debuggee.spawn(JOB, "Worker-1");
    let (thread_id, reason) = client.wait_for_stopped().await;
    assert_eq!(reason, "breakpoint");
    assert_eq!(client.top_frame(thread_id).await["line"], 2);

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
