use std::sync::Arc;

use crate::harness::{
    join, spawn_engine_server, spawn_wire_server, success, test_options, Debuggee,
};
use lumen_dap::{
    ContextRef, DebugEngine, DebuggeeRuntime, ExecutionContext, FrameInfo, SuspendCoordinator,
    ThreadInfo, ValueRef,
};
use serde_json::{json, Value};

#[tokio::test]
async fn initialize_advertises_capabilities() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    let resp = client.initialize_handshake().await;
    let body = resp.get("body").unwrap();
    for capability in [
        "supportsConfigurationDoneRequest",
        "supportsConditionalBreakpoints",
        "supportsFunctionBreakpoints",
        "supportsExceptionInfoRequest",
        "supportsBreakpointLocationsRequest",
    ] {
        assert_eq!(body.get(capability), Some(&json!(true)), "{capability}");
    }

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn argument_errors_do_not_echo_client_values() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;

    let secret = "super-secret-token";
    let resp = client
        .request("stackTrace", json!({ "threadId": secret }))
        .await;
    assert!(!success(&resp), "{resp}");
    let message = resp["message"].as_str().unwrap_or_default();
    assert!(!message.contains(secret), "{message}");
    assert!(message.contains("<redacted>"), "{message}");

    let resp = client
        .request("variables", json!({ "variablesReference": -5 }))
        .await;
    assert!(!success(&resp), "{resp}");
    assert!(!resp["message"].as_str().unwrap_or_default().contains("-5"), "{resp}");

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_ids_give_empty_results() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;

    let resp = client.request("stackTrace", json!({ "threadId": 404 })).await;
    assert!(success(&resp), "{resp}");
    assert_eq!(resp.pointer("/body/stackFrames"), Some(&json!([])));
    assert_eq!(resp.pointer("/body/totalFrames"), Some(&json!(0)));

    let resp = client.request("scopes", json!({ "frameId": 404 })).await;
    assert_eq!(resp.pointer("/body/scopes"), Some(&json!([])));

    let resp = client
        .request("variables", json!({ "variablesReference": 404 }))
        .await;
    assert_eq!(resp.pointer("/body/variables"), Some(&json!([])));

    let resp = client.request("threads", json!({})).await;
    assert_eq!(
        resp.pointer("/body/threads"),
        Some(&json!([{ "id": 1, "name": "All Threads" }]))
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unsupported_commands_fail_without_ending_the_session() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    let resp = client.request("stepBack", json!({ "threadId": 3 })).await;
    assert!(!success(&resp), "{resp}");
    assert!(resp["message"].as_str().unwrap().contains("stepBack"));

    // Arguments may be omitted entirely.
    let seq = client.send_request("threads", Value::Null).await;
    let resp = client.wait_for_response(seq).await;
    assert!(success(&resp), "{resp}");

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn requests_with_a_bad_envelope_get_an_error_response() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    // `command` must be a string.
    let resp = client.request_raw(json!({ "seq": 77, "type": "request", "command": 5 })).await;
    assert_eq!(resp["request_seq"], 77);
    assert!(!success(&resp), "{resp}");

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn overflowing_evaluation_fails_without_ending_the_session() {
    let path = "/app/calc.src";
    let debuggee = Debuggee::with_script(path, "let n = 1\nprint n\n");
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(path, &[2]).await;
    let worker = debuggee.spawn(path, "Worker-1");
    let (thread_id, _) = client.wait_for_stopped().await;
    let frame_id = client.top_frame(thread_id).await["id"].as_i64().unwrap();

    for expression in [
        "(-9223372036854775807 - 1) / -1",
        "[1][-9223372036854775807 - 1]",
    ] {
        let resp = client.evaluate(frame_id, expression).await;
        assert!(!success(&resp), "{resp}");
        let resp = client.request("threads", json!({})).await;
        assert!(success(&resp), "{resp}");
    }

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

struct NoThreads;

impl DebuggeeRuntime for NoThreads {
    fn threads(&self) -> Vec<ThreadInfo> {
        Vec::new()
    }

    fn executable_lines(&self, _path: &str) -> Vec<u32> {
        Vec::new()
    }
}

/// A suspended thread whose evaluator is broken.
struct BrokenEvaluator;

impl ExecutionContext for BrokenEvaluator {
    fn thread_id(&self) -> i64 {
        12
    }

    fn thread_name(&self) -> String {
        "Broken".to_string()
    }

    fn frames(&self) -> Vec<FrameInfo> {
        vec![FrameInfo {
            function: "main".to_string(),
            file: "/app/broken.src".to_string(),
            line: 1,
            scopes: Vec::new(),
        }]
    }

    fn evaluate(&self, _frame_index: usize, _expression: &str) -> Result<ValueRef, String> {
        panic!("evaluator bug");
    }
}

#[tokio::test]
async fn a_panicking_request_gets_an_error_response() {
    let coordinator = Arc::new(SuspendCoordinator::new(true));
    let engine = Arc::new(DebugEngine::new(
        Arc::new(NoThreads),
        coordinator.clone(),
        test_options(),
    ));
    let (client, server_task) = spawn_engine_server(engine);

    client.initialize_handshake().await;
    client.attach().await;
    let worker = std::thread::spawn(move || {
        let ctx: ContextRef = Arc::new(BrokenEvaluator);
        assert!(coordinator.programmatic_break(&ctx, "/app/broken.src", 1, None));
    });
    let (thread_id, _) = client.wait_for_stopped().await;
    let frame_id = client.top_frame(thread_id).await["id"].as_i64().unwrap();

    let resp = client.evaluate(frame_id, "x").await;
    assert!(!success(&resp), "{resp}");
    assert!(resp["message"].as_str().unwrap().contains("panic"), "{resp}");

    let resp = client.request("threads", json!({})).await;
    assert!(success(&resp), "{resp}");

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
