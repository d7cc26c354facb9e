use crate::harness::{join, spawn_wire_server, success, variable, Debuggee};
use serde_json::{json, Value};

const CALLS: &str = "/app/calls.src";
const CALLS_SRC: &str = r#"func square(n)
  let result = n * n
  return result
end
let a = call square(3)
let b = a + 1
print b
"#;

fn line_of(frame: &Value) -> u64 {
    frame.get("line").and_then(Value::as_u64).unwrap_or_default()
}

#[tokio::test]
async fn step_over_stays_in_the_calling_frame() {
    let debuggee = Debuggee::with_script(CALLS, CALLS_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(CALLS, &[5]).await;
    client.configuration_done().await;
    let worker = debuggee.spawn(CALLS, "Worker-1");

    let (thread_id, reason) = client.wait_for_stopped().await;
    assert_eq!(reason, "breakpoint");

    client.step("next", thread_id).await;
    let (stepped, reason) = client.wait_for_stopped().await;
    assert_eq!((stepped, reason.as_str()), (thread_id, "step"));
    let frames = client.stack_frames(thread_id).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(line_of(&frames[0]), 6);

    client.continue_(thread_id).await;
    client.wait_for_output("10").await;
    join(worker).await;

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn step_in_and_step_out_cross_the_call() {
    let debuggee = Debuggee::with_script(CALLS, CALLS_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(CALLS, &[5]).await;
    let worker = debuggee.spawn(CALLS, "Worker-1");
    let (thread_id, _) = client.wait_for_stopped().await;

    client.step("stepIn", thread_id).await;
    let (_, reason) = client.wait_for_stopped().await;
    assert_eq!(reason, "step");
    let frames = client.stack_frames(thread_id).await;
    assert_eq!(frames.len(), 2, "{frames:?}");
    assert_eq!(frames[0]["name"], "square");
    assert_eq!(line_of(&frames[0]), 2);
    assert_eq!(frames[1]["name"], "<main>");
    assert_eq!(line_of(&frames[1]), 5);

    let frame_id = frames[0]["id"].as_i64().unwrap();
    let args = client.scope_reference(frame_id, "Arguments").await;
    assert_eq!(variable(&client.variables(args).await, "n")["value"], "3");

    // The caller frame evaluates in its own scope.
    let caller_id = frames[1]["id"].as_i64().unwrap();
    let resp = client.evaluate(caller_id, "n").await;
    assert!(!success(&resp), "{resp}");

    client.step("stepOut", thread_id).await;
    let (_, reason) = client.wait_for_stopped().await;
    assert_eq!(reason, "step");
    let frames = client.stack_frames(thread_id).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(line_of(&frames[0]), 6);
    let frame_id = frames[0]["id"].as_i64().unwrap();
    let resp = client.evaluate(frame_id, "a").await;
    assert_eq!(resp.pointer("/body/result").and_then(Value::as_str), Some("9"));

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn function_breakpoint_stops_on_entry() {
    let debuggee = Debuggee::with_script(CALLS, CALLS_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    let resp = client
        .request(
            "setFunctionBreakpoints",
            json!({ "breakpoints": [{ "name": "calls.SQUARE", "condition": "n > 2" }] }),
        )
        .await;
    assert_eq!(
        resp.pointer("/body/breakpoints/0/verified"),
        Some(&json!(true)),
        "{resp}"
    );
    let worker = debuggee.spawn(CALLS, "Worker-1");

    let (thread_id, reason) = client.wait_for_stopped().await;
    assert_eq!(reason, "function breakpoint");
    let frame = client.top_frame(thread_id).await;
    assert_eq!(frame["name"], "square");
    assert_eq!(line_of(&frame), 1);

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stepping_a_running_thread_fails() {
    let debuggee = Debuggee::new();
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    for command in ["next", "stepIn", "stepOut", "continue"] {
        let resp = client.request(command, json!({ "threadId": 42 })).await;
        assert!(!success(&resp), "{command}: {resp}");
    }

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
