use crate::harness::{join, spawn_wire_server, success, variable, Debuggee};
use serde_json::{json, Value};

const INSPECT: &str = "/app/inspect.src";
const INSPECT_SRC: &str = r#"let user = {name: "ann", tags: ["a", "b", "c"], address: {city: "Oslo"}}
let rows = table(["id", "name"], [1, "ann"], [2, "bob"])
let empty = []
func greet(who)
  return "hi " + who
end
print user.name
"#;

fn names(variables: &[Value]) -> Vec<&str> {
    variables.iter().filter_map(|v| v["name"].as_str()).collect()
}

fn reference(variable: &Value) -> u64 {
    variable["variablesReference"].as_u64().unwrap_or_default()
}

#[tokio::test]
async fn structured_values_expand_lazily() {
    let debuggee = Debuggee::with_script(INSPECT, INSPECT_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(INSPECT, &[7]).await;
    let worker = debuggee.spawn(INSPECT, "Worker-1");
    let (thread_id, _) = client.wait_for_stopped().await;

    let frame_id = client.top_frame(thread_id).await["id"].as_i64().unwrap();
    let globals = client.scope_reference(frame_id, "Variables").await;
    let vars = client.variables(globals).await;
    assert_eq!(names(&vars), vec!["empty", "greet", "rows", "user"]);

    let empty = variable(&vars, "empty");
    assert_eq!(empty["value"], "Array (0)");
    assert_eq!(reference(empty), 0);
    assert_eq!(variable(&vars, "greet")["value"], "{} (3 members)");

    let user = variable(&vars, "user");
    assert_eq!(user["value"], "{} (3 members)");
    let fields = client.variables(reference(user)).await;
    assert_eq!(names(&fields), vec!["address", "name", "tags"]);
    assert_eq!(variable(&fields, "name")["value"], "\"ann\"");

    let tags = variable(&fields, "tags");
    assert_eq!(tags["value"], "Array (3)");
    assert_eq!(tags["indexedVariables"], 3);
    let page = client
        .request(
            "variables",
            json!({
                "variablesReference": reference(tags),
                "filter": "indexed",
                "start": 1,
                "count": 1,
            }),
        )
        .await;
    assert_eq!(
        page.pointer("/body/variables"),
        Some(&json!([{ "name": "[2]", "value": "\"b\"", "type": "string", "variablesReference": 0 }]))
    );

    let rows = variable(&vars, "rows");
    assert_eq!(rows["value"], "Table (2 rows)");
    let table_rows = client.variables(reference(rows)).await;
    assert_eq!(names(&table_rows), vec!["[1]", "[2]"]);
    let second = client.variables(reference(&table_rows[1])).await;
    assert_eq!(variable(&second, "name")["value"], "\"bob\"");

    // The same value reached twice keeps one handle.
    let again = client.variables(globals).await;
    assert_eq!(reference(variable(&again, "user")), reference(user));

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn evaluate_and_source_path() {
    let debuggee = Debuggee::with_script(INSPECT, INSPECT_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(INSPECT, &[7]).await;
    let worker = debuggee.spawn(INSPECT, "Worker-1");
    let (thread_id, _) = client.wait_for_stopped().await;
    let frame_id = client.top_frame(thread_id).await["id"].as_i64().unwrap();

    let resp = client.evaluate(frame_id, "user.address").await;
    assert!(success(&resp), "{resp}");
    let address_ref = resp
        .pointer("/body/variablesReference")
        .and_then(Value::as_u64)
        .unwrap();
    assert!(address_ref > 0);
    let address = client.variables(address_ref).await;
    assert_eq!(variable(&address, "city")["value"], "\"Oslo\"");

    let resp = client.evaluate(frame_id, "1 +").await;
    assert!(!success(&resp), "{resp}");
    let resp = client.evaluate(frame_id, "missing").await;
    assert!(!success(&resp), "{resp}");
    assert!(resp["message"].as_str().unwrap().contains("missing is not defined"));
    let resp = client.evaluate(9_999, "1").await;
    assert!(!success(&resp), "{resp}");

    let globals = client.scope_reference(frame_id, "Variables").await;
    let vars = client.variables(globals).await;
    let greet = variable(&vars, "greet");
    let params = client.variables(reference(greet)).await;
    assert_eq!(names(&params), vec!["line", "name", "parameters"]);
    assert_eq!(variable(&params, "line")["value"], "4");

    let resp = client
        .request("getSourcePath", json!({ "variablesReference": reference(greet) }))
        .await;
    assert!(success(&resp), "{resp}");
    assert_eq!(resp.pointer("/body/path"), Some(&json!(INSPECT)));

    let resp = client
        .request("getSourcePath", json!({ "variablesReference": globals }))
        .await;
    assert_eq!(resp.pointer("/body/path"), Some(&Value::Null));

    client.continue_(thread_id).await;
    join(worker).await;
    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn handles_of_dropped_values_are_reclaimed() {
    let debuggee = Debuggee::with_script(INSPECT, INSPECT_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(INSPECT, &[3]).await;
    let worker = debuggee.spawn(INSPECT, "Worker-1");
    let (thread_id, _) = client.wait_for_stopped().await;

    let frame_id = client.top_frame(thread_id).await["id"].as_i64().unwrap();
    let globals = client.scope_reference(frame_id, "Variables").await;
    let vars = client.variables(globals).await;
    let user_ref = reference(variable(&vars, "user"));
    assert!(!client.variables(user_ref).await.is_empty());

    client.set_breakpoints(INSPECT, &[]).await;
    client.continue_(thread_id).await;
    join(worker).await;

    debuggee.engine.reclaim();
    assert!(client.variables(user_ref).await.is_empty());
    assert!(client.variables(globals).await.is_empty());

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}
