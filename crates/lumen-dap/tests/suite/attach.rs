use std::sync::Arc;

use crate::harness::{spawn_wire_server, success, Debuggee, SECRET};
use lumen_dap::demo::DemoRuntime;
use lumen_dap::{DebugEngine, EngineOptions, SuspendCoordinator};
use serde_json::{json, Value};

fn message(resp: &Value) -> &str {
    resp.get("message").and_then(Value::as_str).unwrap_or_default()
}

#[tokio::test]
async fn wrong_secret_is_rejected_and_the_session_ends() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    let resp = client.attach_with(json!({ "secret": "guess" })).await;
    assert!(!success(&resp), "{resp}");
    assert!(message(&resp).contains("attach rejected"), "{resp}");
    assert!(!message(&resp).contains("guess"), "{resp}");
    client.wait_for_event("terminated").await;

    server_task.await.unwrap().unwrap();
    assert!(!debuggee.engine.is_attached());
    assert!(client.received_events("initialized").await.is_empty());
}

#[tokio::test]
async fn missing_secret_is_rejected() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    let resp = client.attach_with(json!({ "secret": "   " })).await;
    assert!(!success(&resp), "{resp}");
    client.wait_for_event("terminated").await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn attach_is_rejected_when_no_secret_is_configured() {
    let coordinator = Arc::new(SuspendCoordinator::new(true));
    let runtime = DemoRuntime::new(coordinator.clone(), true);
    let engine = Arc::new(DebugEngine::new(
        runtime.clone(),
        coordinator,
        EngineOptions {
            expected_secret: None,
            ..EngineOptions::default()
        },
    ));
    let debuggee = Debuggee { runtime, engine };
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    let resp = client.attach_with(json!({ "secret": SECRET })).await;
    assert!(!success(&resp), "{resp}");
    assert!(message(&resp).contains("no debugger secret"), "{resp}");
    client.wait_for_event("terminated").await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn session_requests_need_an_attached_client() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    let resp = client
        .request(
            "setBreakpoints",
            json!({ "source": { "path": "/app/x.src" }, "breakpoints": [{ "line": 1 }] }),
        )
        .await;
    assert!(!success(&resp), "{resp}");
    assert_eq!(message(&resp), "not attached");

    let resp = client.request("launch", json!({})).await;
    assert!(!success(&resp), "{resp}");

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn a_second_client_can_attach_after_the_first_disconnects() {
    let debuggee = Debuggee::new();

    let (first, first_task) = spawn_wire_server(&debuggee);
    first.initialize_handshake().await;
    first.attach().await;
    first.disconnect().await;
    first_task.await.unwrap().unwrap();

    let (second, second_task) = spawn_wire_server(&debuggee);
    second.initialize_handshake().await;
    second.attach().await;
    assert!(debuggee.engine.is_attached());
    second.disconnect().await;
    second_task.await.unwrap().unwrap();
}
