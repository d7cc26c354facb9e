use crate::harness::{join, spawn_wire_server, success, variable, Debuggee, SECRET};
use serde_json::{json, Value};

const COUNTER: &str = "/app/counter.src";
const COUNTER_SRC: &str = r#"# counts to three
let total = 0
let i = 1
while i <= 3
  let total = total + i
  let i = i + 1
end
print "total=" + total
"#;

fn verified(resp: &Value) -> Vec<bool> {
    resp.pointer("/body/breakpoints")
        .and_then(Value::as_array)
        .map(|bps| {
            bps.iter()
                .map(|bp| bp.get("verified").and_then(Value::as_bool).unwrap_or(false))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn stops_at_a_line_breakpoint_and_continues() {
    let debuggee = Debuggee::with_script(COUNTER, COUNTER_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    let resp = client.set_breakpoints(COUNTER, &[5, 7]).await;
    assert_eq!(verified(&resp), vec![true, false], "{resp}");
    assert!(resp.pointer("/body/breakpoints/1/message").is_some(), "{resp}");
    client.configuration_done().await;

    let worker = debuggee.spawn(COUNTER, "Worker-1");

    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped.pointer("/body/reason"), Some(&json!("breakpoint")));
    assert_eq!(
        stopped.pointer("/body/hitBreakpointIds"),
        Some(&json!([resp.pointer("/body/breakpoints/0/id").unwrap()]))
    );
    let thread_id = stopped.pointer("/body/threadId").and_then(Value::as_i64).unwrap();
    let frame = client.top_frame(thread_id).await;
    assert_eq!(frame.get("line").and_then(Value::as_u64), Some(5));
    assert_eq!(frame.get("name").and_then(Value::as_str), Some("<main>"));
    assert_eq!(
        frame.pointer("/source/path").and_then(Value::as_str),
        Some(COUNTER)
    );

    let frame_id = frame.get("id").and_then(Value::as_i64).unwrap();
    let globals = client.scope_reference(frame_id, "Variables").await;
    let vars = client.variables(globals).await;
    assert_eq!(variable(&vars, "total")["value"], "0");
    assert_eq!(variable(&vars, "i")["value"], "1");

    let resp = client.continue_(thread_id).await;
    assert_eq!(resp.pointer("/body/allThreadsContinued"), Some(&json!(false)));

    let (thread_id, _) = client.wait_for_stopped().await;
    let frame_id = client.top_frame(thread_id).await["id"].as_i64().unwrap();
    let resp = client.evaluate(frame_id, "i").await;
    assert!(success(&resp), "{resp}");
    assert_eq!(resp.pointer("/body/result").and_then(Value::as_str), Some("2"));

    client.set_breakpoints(COUNTER, &[]).await;
    client.continue_(thread_id).await;
    client.wait_for_output("total=6").await;
    join(worker).await;

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn conditional_breakpoint_only_stops_when_true() {
    let debuggee = Debuggee::with_script(COUNTER, COUNTER_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    let resp = client
        .request(
            "setBreakpoints",
            json!({
                "source": { "path": COUNTER },
                "breakpoints": [
                    { "line": 5, "condition": "i == 3" },
                    { "line": 6, "condition": "no_such_variable" },
                ],
            }),
        )
        .await;
    assert_eq!(verified(&resp), vec![true, true]);
    client.configuration_done().await;

    let worker = debuggee.spawn(COUNTER, "Worker-1");
    let (thread_id, _) = client.wait_for_stopped().await;
    let frame_id = client.top_frame(thread_id).await["id"].as_i64().unwrap();
    let resp = client.evaluate(frame_id, "i").await;
    assert_eq!(resp.pointer("/body/result").and_then(Value::as_str), Some("3"));

    client.continue_(thread_id).await;
    client.wait_for_output("total=6").await;
    join(worker).await;
    assert_eq!(client.received_events("stopped").await.len(), 0);

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn breakpoint_locations_lists_executable_lines() {
    let debuggee = Debuggee::with_script(COUNTER, COUNTER_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    let resp = client
        .request(
            "breakpointLocations",
            json!({ "source": { "path": COUNTER }, "line": 1, "endLine": 8 }),
        )
        .await;
    assert!(success(&resp), "{resp}");
    let lines: Vec<u64> = resp
        .pointer("/body/breakpoints")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(|bp| bp.get("line").and_then(Value::as_u64))
        .collect();
    assert_eq!(lines, vec![2, 3, 4, 5, 6, 8]);

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn path_transforms_apply_in_both_directions() {
    let debuggee = Debuggee::with_script(COUNTER, COUNTER_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    let resp = client
        .attach_with(json!({
            "secret": SECRET,
            "pathTransforms": [{ "idePrefix": "C:/src", "serverPrefix": "/app" }],
        }))
        .await;
    assert!(success(&resp), "{resp}");
    client.wait_for_event("initialized").await;

    let resp = client.set_breakpoints("C:/src/counter.src", &[2]).await;
    assert_eq!(verified(&resp), vec![true]);

    let bindings = client.request("debugBreakpointBindings", json!({})).await;
    assert_eq!(
        bindings.pointer("/body/canonicalFilenames"),
        Some(&json!([COUNTER]))
    );
    assert_eq!(
        bindings.pointer("/body/breakpoints/0/file").and_then(Value::as_str),
        Some(COUNTER)
    );
    let transforms = bindings.pointer("/body/pathTransforms/0").and_then(Value::as_str).unwrap();
    assert!(transforms.contains("idePrefix='C:/src'"), "{transforms}");

    let worker = debuggee.spawn(COUNTER, "Worker-1");
    let (thread_id, _) = client.wait_for_stopped().await;
    let frame = client.top_frame(thread_id).await;
    assert_eq!(
        frame.pointer("/source/path").and_then(Value::as_str),
        Some("C:/src/counter.src")
    );

    client.disconnect().await;
    join(worker).await;
    server_task.await.unwrap().unwrap();
}
