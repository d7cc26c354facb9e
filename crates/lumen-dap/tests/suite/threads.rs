use std::collections::HashSet;

use crate::harness::{join, spawn_wire_server, success, Debuggee};
use serde_json::{json, Value};

const JOB: &str = "/app/job.src";
const JOB_SRC: &str = "let n = 1\nprint n\n";

const SPIN: &str = "/app/spin.src";
const SPIN_SRC: &str = r#"let i = 0
while i < 400
  let i = i + 1
  sleep 5
end
"#;

async fn thread_names(client: &crate::harness::DapTestClient) -> Vec<String> {
    let resp = client.request("threads", json!({})).await;
    assert!(success(&resp), "{resp}");
    resp.pointer("/body/threads")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(|t| t.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[tokio::test]
async fn threads_are_listed_in_natural_order_after_the_virtual_entry() {
    let debuggee = Debuggee::with_script(JOB, JOB_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(JOB, &[2]).await;

    let first = debuggee.spawn(JOB, "Worker-12");
    let second = debuggee.spawn(JOB, "Worker-2");
    let mut stopped = HashSet::new();
    stopped.insert(client.wait_for_stopped().await.0);
    stopped.insert(client.wait_for_stopped().await.0);
    assert_eq!(stopped.len(), 2);

    assert_eq!(
        thread_names(&client).await,
        vec![
            "All Threads".to_string(),
            "Worker-2 (suspended)".to_string(),
            "Worker-12 (suspended)".to_string(),
        ]
    );

    let resp = client.continue_(1).await;
    assert_eq!(resp.pointer("/body/allThreadsContinued"), Some(&json!(true)));
    join(first).await;
    join(second).await;
    assert_eq!(thread_names(&client).await, vec!["All Threads".to_string()]);

    client.disconnect().await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn pause_stops_a_running_thread() {
    let debuggee = Debuggee::with_script(SPIN, SPIN_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    let worker = debuggee.spawn(SPIN, "Worker-1");

    let resp = client.request("pause", json!({ "threadId": 1 })).await;
    assert!(success(&resp), "{resp}");
    let (thread_id, reason) = client.wait_for_stopped().await;
    assert_eq!(reason, "pause");

    let frame = client.top_frame(thread_id).await;
    let line = frame["line"].as_u64().unwrap();
    assert!((1..=4).contains(&line), "paused on line {line}");

    client.disconnect().await;
    join(worker).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn disconnect_resumes_every_suspended_thread() {
    let debuggee = Debuggee::with_script(JOB, JOB_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(JOB, &[1]).await;
    let workers = [
        debuggee.spawn(JOB, "Worker-1"),
        debuggee.spawn(JOB, "Worker-2"),
        debuggee.spawn(JOB, "Worker-3"),
    ];
    for _ in 0..workers.len() {
        client.wait_for_stopped().await;
    }
    assert_eq!(debuggee.engine.coordinator().suspended_ids().len(), 3);

    client.disconnect().await;
    for worker in workers {
        join(worker).await;
    }
    assert!(debuggee.engine.coordinator().suspended_ids().is_empty());
    assert!(!debuggee.engine.is_attached());
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn closing_the_stream_detaches() {
    let debuggee = Debuggee::with_script(JOB, JOB_SRC);
    let (client, server_task) = spawn_wire_server(&debuggee);

    client.initialize_handshake().await;
    client.attach().await;
    client.set_breakpoints(JOB, &[2]).await;
    let worker = debuggee.spawn(JOB, "Worker-1");
    client.wait_for_stopped().await;

    drop(client);
    server_task.await.unwrap().unwrap();
    join(worker).await;
    assert!(!debuggee.engine.is_attached());
}
