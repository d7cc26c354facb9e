use crate::harness::{join, spawn_wire_server, success, Debuggee};
use serde_json::{json, Value};

const FAIL: &str = "/app/fail.src";
const FAIL_SRC: &str = r#"let items = [1, 2]
print "before"
throw ValidationError "bad item " + items[2]
print "after"
"#;

#[tokio::test]
async fn uncaught_exception_stops_when_the_filter_is_enabled() {
    let debuggee = Debuggee::with_script(FAIL, FAIL_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    let init = client.initialize_handshake().await;
    assert_eq!(
        init.pointer("/body/exceptionBreakpointFilters/0/filter"),
        Some(&json!("uncaught"))
    );
    client.attach().await;
    let resp = client
        .request("setExceptionBreakpoints", json!({ "filters": ["uncaught"] }))
        .await;
    assert!(success(&resp), "{resp}");
    client.configuration_done().await;

    let worker = debuggee.spawn(FAIL, "Worker-1");
    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped.pointer("/body/reason"), Some(&json!("exception")));
    assert_eq!(
        stopped.pointer("/body/description"),
        Some(&json!("ValidationError: bad item 2"))
    );
    assert_eq!(stopped.pointer("/body/text"), Some(&json!("bad item 2")));
    assert!(stopped.pointer("/body/hitBreakpointIds").is_none(), "{stopped}");
    let thread_id = stopped.pointer("/body/threadId").and_then(Value::as_i64).unwrap();

    let info = client
        .request("exceptionInfo", json!({ "threadId": thread_id }))
        .await;
    assert!(success(&info), "{info}");
    assert_eq!(info.pointer("/body/exceptionId"), Some(&json!("ValidationError")));
    assert_eq!(info.pointer("/body/description"), Some(&json!("bad item 2")));
    assert_eq!(info.pointer("/body/breakMode"), Some(&json!("unhandled")));
    let trace = info
        .pointer("/body/details/stackTrace")
        .and_then(Value::as_str)
        .unwrap();
    assert!(trace.contains("at <main> (/app/fail.src:3)"), "{trace}");

    let frame = client.top_frame(thread_id).await;
    assert_eq!(frame["line"], 3);
    let scopes = client
        .request("scopes", json!({ "frameId": frame["id"] }))
        .await;
    assert_eq!(scopes.pointer("/body/scopes/0/name"), Some(&json!("Exception")));
    let exception_ref = scopes
        .pointer("/body/scopes/0/variablesReference")
        .and_then(Value::as_u64)
        .unwrap();
    let fields = client.variables(exception_ref).await;
    let names: Vec<&str> = fields.iter().filter_map(|f| f["name"].as_str()).collect();
    assert!(names.contains(&"message") && names.contains(&"type"), "{names:?}");

    client.continue_(thread_id).await;
    let output = client.wait_for_output("Uncaught ValidationError").await;
    assert_eq!(output.pointer("/body/category"), Some(&json!("stderr")));
    join(worker).await;

    let outputs = client.received_events("output").await;
    assert!(
        outputs.iter().all(|o| o.pointer("/body/output") != Some(&json!("after\n"))),
        "the script must not continue past the throw: {outputs:?}"
    );

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn uncaught_exception_is_only_reported_when_the_filter_is_off() {
    let debuggee = Debuggee::with_script(FAIL, FAIL_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client
        .request("setExceptionBreakpoints", json!({ "filters": ["uncaught"] }))
        .await;
    client
        .request("setExceptionBreakpoints", json!({ "filters": [] }))
        .await;

    let worker = debuggee.spawn(FAIL, "Worker-1");
    client.wait_for_output("before").await;
    client.wait_for_output("Uncaught ValidationError: bad item 2").await;
    join(worker).await;
    assert!(client.received_events("stopped").await.is_empty());

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn runtime_errors_are_exceptions_too() {
    let path = "/app/divide.src";
    let debuggee = Debuggee::with_script(path, "let zero = 0\nlet x = 10 / zero\n");
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client
        .request("setExceptionBreakpoints", json!({ "filters": ["uncaught"] }))
        .await;

    let worker = debuggee.spawn(path, "Worker-1");
    let (thread_id, reason) = client.wait_for_stopped().await;
    assert_eq!(reason, "exception");
    let info = client
        .request("exceptionInfo", json!({ "threadId": thread_id }))
        .await;
    assert_eq!(info.pointer("/body/exceptionId"), Some(&json!("RuntimeError")));
    assert_eq!(info.pointer("/body/description"), Some(&json!("division by zero")));

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn exception_info_without_an_exception_is_neutral() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    let info = client.request("exceptionInfo", json!({ "threadId": 77 })).await;
    assert!(success(&info), "{info}");
    assert_eq!(info.pointer("/body/exceptionId"), Some(&json!("unknown")));
    assert!(info.pointer("/body/details").is_none());

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
