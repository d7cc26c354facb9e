use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use lumen_core::{sanitize_json_error_message, AttachArgs};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    breakpoints::SourceBreakpoint,
    dap_tokio::{make_event, make_response, DapError, DapReader, DapWriter, Request},
    engine::{DebugEngine, UNCAUGHT_FILTER},
    error::{EngineError, EngineResult},
    function_breakpoints::FunctionBreakpointSpec,
    render::VariablesFilter,
    step::StepMode,
    suspend::EngineEvent,
};

#[derive(Debug, Error)]
pub enum WireServerError {
    #[error(transparent)]
    Dap(#[from] DapError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

type Result<T> = std::result::Result<T, WireServerError>;

/// Run one DAP session over stdio.
pub async fn run_stdio(engine: Arc<DebugEngine>) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, engine).await.map_err(anyhow::Error::from)
}

/// Accept clients on `addr`, one session at a time.
pub async fn serve(addr: SocketAddr, engine: Arc<DebugEngine>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, engine).await
}

pub async fn serve_listener(listener: TcpListener, engine: Arc<DebugEngine>) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "listening for debugger clients");
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "debugger client connected");
        let (read, write) = stream.into_split();
        if let Err(err) = run(read, write, engine.clone()).await {
            tracing::warn!(%peer, error = %err, "debugger session ended with an error");
        }
        tracing::info!(%peer, "debugger client disconnected");
    }
}

/// Detaches the engine however the session loop exits.
struct DetachGuard(Arc<DebugEngine>);

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.0.detach();
    }
}

enum Handled {
    Reply(Option<Value>),
    /// Reply, then emit the named event.
    ReplyThen(Option<Value>, &'static str),
    /// Reply, emit `terminated`, and end the session.
    End(Option<Value>),
}

struct SessionState {
    out_tx: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
    event_tasks: Vec<JoinHandle<()>>,
}

pub async fn run<R, W>(reader: R, writer: W, engine: Arc<DebugEngine>) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let seq = Arc::new(AtomicI64::new(1));

    let writer_task = tokio::spawn(async move {
        let mut writer = DapWriter::new(writer);
        while let Some(msg) = out_rx.recv().await {
            if let Err(err) = writer.write_value(&msg).await {
                tracing::debug!(error = %err, "failed to write DAP message");
                break;
            }
        }
    });

    let guard = DetachGuard(engine.clone());
    let reclaim_task = spawn_reclaim_task(engine.clone());
    let mut state = SessionState {
        out_tx,
        seq,
        event_tasks: Vec::new(),
    };
    let mut reader = DapReader::new(reader);

    loop {
        let value = match reader.read_value().await {
            Ok(Some(value)) => value,
            Ok(None) => break,
            Err(DapError::Json(err)) => {
                // The frame was consumed; the stream is still in sync.
                tracing::warn!(
                    error = %sanitize_json_error_message(&err.to_string()),
                    "dropping malformed DAP message"
                );
                continue;
            }
            Err(err) => {
                reclaim_task.abort();
                return Err(err.into());
            }
        };

        let request = match serde_json::from_value::<Request>(value.clone()) {
            Ok(request) => request,
            Err(err) => {
                reply_to_malformed(&state, &value, &err);
                continue;
            }
        };
        if request.message_type != "request" {
            continue;
        }

        tracing::debug!(command = %request.command, seq = request.seq, "DAP request");
        let outcome = catch_unwind(AssertUnwindSafe(|| handle(&engine, &request, &mut state)))
            .unwrap_or_else(|_| {
                tracing::error!(
                    command = %request.command,
                    "panic in DAP request handler; replying with an error"
                );
                Err(EngineError::Panicked(request.command.clone()))
            });
        match outcome {
            Ok(Handled::Reply(body)) => {
                send_response(&state.out_tx, &state.seq, &request, true, body, None);
            }
            Ok(Handled::ReplyThen(body, event)) => {
                send_response(&state.out_tx, &state.seq, &request, true, body, None);
                send_event(&state.out_tx, &state.seq, event, None);
            }
            Ok(Handled::End(body)) => {
                send_response(&state.out_tx, &state.seq, &request, true, body, None);
                send_event(&state.out_tx, &state.seq, "terminated", None);
                break;
            }
            Err(err) => {
                tracing::debug!(command = %request.command, error = %err, "DAP request failed");
                send_response(
                    &state.out_tx,
                    &state.seq,
                    &request,
                    false,
                    None,
                    Some(err.to_string()),
                );
                if matches!(err, EngineError::AttachRejected(_)) {
                    send_event(&state.out_tx, &state.seq, "terminated", None);
                    break;
                }
            }
        }
    }

    reclaim_task.abort();
    // Detaching drops the engine's event sender, which ends the forwarders
    // once they have flushed what was already queued.
    drop(guard);
    for task in state.event_tasks.drain(..) {
        let _ = task.await;
    }
    drop(state);
    let _ = writer_task.await;
    Ok(())
}

fn handle(engine: &Arc<DebugEngine>, request: &Request, state: &mut SessionState) -> EngineResult<Handled> {
    match request.command.as_str() {
        "initialize" => Ok(Handled::Reply(Some(capabilities()))),
        "attach" => {
            let args = AttachArgs::from_value(&request.arguments);
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            engine.attach(&args, events_tx)?;
            state.event_tasks.push(spawn_event_task(
                events_rx,
                state.out_tx.clone(),
                state.seq.clone(),
            ));
            Ok(Handled::ReplyThen(None, "initialized"))
        }
        "launch" => Err(EngineError::InvalidRequest(
            "launch is not supported; attach to a running debuggee".to_string(),
        )),
        "configurationDone" => Ok(Handled::Reply(None)),
        "setBreakpoints" => {
            let args: SetBreakpointsArguments = parse_args(request)?;
            let path = args.source.path.unwrap_or_default();
            let mut requested: Vec<SourceBreakpoint> = args
                .breakpoints
                .into_iter()
                .map(|bp| SourceBreakpoint {
                    line: bp.line,
                    condition: bp.condition,
                })
                .collect();
            if requested.is_empty() {
                requested = args
                    .lines
                    .into_iter()
                    .map(|line| SourceBreakpoint { line, condition: None })
                    .collect();
            }

            let breakpoints: Vec<Value> = engine
                .set_breakpoints(&path, &requested)?
                .into_iter()
                .map(|bp| {
                    let mut row = json!({
                        "id": bp.id,
                        "verified": bp.verified,
                        "line": bp.line,
                        "source": { "path": path },
                    });
                    if !bp.verified {
                        row["message"] = json!("No executable code at this line");
                    }
                    row
                })
                .collect();
            Ok(Handled::Reply(Some(json!({ "breakpoints": breakpoints }))))
        }
        "setFunctionBreakpoints" => {
            let args: SetFunctionBreakpointsArguments = parse_args(request)?;
            let specs: Vec<FunctionBreakpointSpec> = args
                .breakpoints
                .into_iter()
                .map(|bp| FunctionBreakpointSpec {
                    name: bp.name,
                    condition: bp.condition,
                })
                .collect();
            let created = engine.set_function_breakpoints(&specs)?;
            let breakpoints: Vec<Value> = created
                .iter()
                .map(|bp| json!({ "id": bp.id, "verified": bp.verified }))
                .collect();
            Ok(Handled::Reply(Some(json!({ "breakpoints": breakpoints }))))
        }
        "setExceptionBreakpoints" => {
            let args: SetExceptionBreakpointsArguments = parse_args(request)?;
            engine.set_exception_breakpoints(&args.filters)?;
            Ok(Handled::Reply(None))
        }
        "breakpointLocations" => {
            let args: BreakpointLocationsArguments = parse_args(request)?;
            let path = args.source.path.unwrap_or_default();
            let lines: Vec<Value> = engine
                .breakpoint_locations(&path, args.line, args.end_line)
                .into_iter()
                .map(|line| json!({ "line": line }))
                .collect();
            Ok(Handled::Reply(Some(json!({ "breakpoints": lines }))))
        }
        "threads" => Ok(Handled::Reply(Some(json!({ "threads": engine.threads() })))),
        "stackTrace" => {
            let args: StackTraceArguments = parse_args(request)?;
            let (frames, total) = engine.stack_trace(args.thread_id, args.start_frame, args.levels);
            Ok(Handled::Reply(Some(json!({
                "stackFrames": frames,
                "totalFrames": total,
            }))))
        }
        "scopes" => {
            let args: ScopesArguments = parse_args(request)?;
            Ok(Handled::Reply(Some(json!({ "scopes": engine.scopes(args.frame_id) }))))
        }
        "variables" => {
            let args: VariablesArguments = parse_args(request)?;
            let variables = engine.variables(
                args.variables_reference,
                VariablesFilter::parse(args.filter.as_deref()),
                args.start,
                args.count,
            );
            Ok(Handled::Reply(Some(json!({ "variables": variables }))))
        }
        "evaluate" => {
            let args: EvaluateArguments = parse_args(request)?;
            let result = engine.evaluate(args.frame_id, &args.expression)?;
            Ok(Handled::Reply(Some(to_body(&result))))
        }
        "continue" => {
            let args: ThreadArguments = parse_args(request)?;
            let all = engine.continue_(args.thread_id)?;
            engine.reclaim();
            Ok(Handled::Reply(Some(json!({ "allThreadsContinued": all }))))
        }
        command @ ("next" | "stepIn" | "stepOut") => {
            let args: ThreadArguments = parse_args(request)?;
            let mode = StepMode::from_command(command)
                .ok_or_else(|| EngineError::InvalidRequest(format!("unknown step {command}")))?;
            engine.step(args.thread_id, mode)?;
            engine.reclaim();
            Ok(Handled::Reply(None))
        }
        "pause" => {
            let args: ThreadArguments = parse_args(request)?;
            engine.pause(args.thread_id)?;
            Ok(Handled::Reply(None))
        }
        "exceptionInfo" => {
            let args: ThreadArguments = parse_args(request)?;
            Ok(Handled::Reply(Some(to_body(&engine.exception_info(args.thread_id)))))
        }
        "debugBreakpointBindings" => Ok(Handled::Reply(Some(to_body(&engine.breakpoint_bindings())))),
        "getSourcePath" => {
            let args: VariablesArguments = parse_args(request)?;
            Ok(Handled::Reply(Some(json!({
                "path": engine.source_path(args.variables_reference),
            }))))
        }
        "disconnect" => {
            engine.detach();
            Ok(Handled::End(None))
        }
        other => Err(EngineError::InvalidRequest(format!("unsupported request {other}"))),
    }
}

fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsEvaluateForHovers": true,
        "supportsConditionalBreakpoints": true,
        "supportsHitConditionalBreakpoints": false,
        "supportsLogPoints": false,
        "supportsFunctionBreakpoints": true,
        "supportsBreakpointLocationsRequest": true,
        "supportsExceptionInfoRequest": true,
        "supportsSingleThreadExecutionRequests": true,
        "supportsSetVariable": false,
        "supportsStepBack": false,
        "exceptionBreakpointFilters": [{
            "filter": UNCAUGHT_FILTER,
            "label": "Uncaught Exceptions",
            "description": "Break when an exception is not handled by the debuggee",
            "default": false,
        }],
    })
}

fn parse_args<T: DeserializeOwned>(request: &Request) -> EngineResult<T> {
    let arguments = match &request.arguments {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|err| {
        EngineError::InvalidRequest(format!(
            "invalid {} arguments: {}",
            request.command,
            sanitize_json_error_message(&err.to_string())
        ))
    })
}

fn to_body<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}

/// Best effort: answer a request whose envelope did not decode, if it carried
/// enough to address a response to.
fn reply_to_malformed(state: &SessionState, value: &Value, err: &serde_json::Error) {
    let message = format!(
        "malformed request: {}",
        sanitize_json_error_message(&err.to_string())
    );
    tracing::warn!(%message, "rejecting malformed DAP request");
    let Some(request_seq) = value.get("seq").and_then(Value::as_i64) else {
        return;
    };
    let command = value
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let request = Request {
        seq: request_seq,
        message_type: "request".to_string(),
        command,
        arguments: Value::Null,
    };
    send_response(&state.out_tx, &state.seq, &request, false, None, Some(message));
}

#[derive(Debug, Default, Deserialize)]
struct SourceArgument {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceBreakpointArgument {
    line: u32,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetBreakpointsArguments {
    #[serde(default)]
    source: SourceArgument,
    #[serde(default)]
    breakpoints: Vec<SourceBreakpointArgument>,
    #[serde(default)]
    lines: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct FunctionBreakpointArgument {
    name: String,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetFunctionBreakpointsArguments {
    #[serde(default)]
    breakpoints: Vec<FunctionBreakpointArgument>,
}

#[derive(Debug, Deserialize)]
struct SetExceptionBreakpointsArguments {
    #[serde(default)]
    filters: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreakpointLocationsArguments {
    #[serde(default)]
    source: SourceArgument,
    line: u32,
    #[serde(default)]
    end_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadArguments {
    #[serde(default)]
    thread_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackTraceArguments {
    thread_id: i64,
    #[serde(default)]
    start_frame: usize,
    #[serde(default)]
    levels: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopesArguments {
    frame_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariablesArguments {
    variables_reference: u64,
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateArguments {
    expression: String,
    #[serde(default)]
    frame_id: Option<i64>,
}

fn send_event(tx: &mpsc::UnboundedSender<Value>, seq: &Arc<AtomicI64>, event: impl Into<String>, body: Option<Value>) {
    let s = seq.fetch_add(1, Ordering::Relaxed);
    let evt = make_event(s, event, body);
    let _ = tx.send(serde_json::to_value(evt).unwrap_or_else(|_| json!({})));
}

fn send_response(
    tx: &mpsc::UnboundedSender<Value>,
    seq: &Arc<AtomicI64>,
    request: &Request,
    success: bool,
    body: Option<Value>,
    message: Option<String>,
) {
    let s = seq.fetch_add(1, Ordering::Relaxed);
    let resp = make_response(s, request, success, body, message);
    let _ = tx.send(serde_json::to_value(resp).unwrap_or_else(|_| json!({})));
}

fn spawn_event_task(
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    tx: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Stopped {
                    thread_id,
                    reason,
                    description,
                    text,
                    hit_breakpoint_ids,
                } => {
                    let mut body = json!({
                        "reason": reason.as_str(),
                        "threadId": thread_id,
                        "allThreadsStopped": false,
                    });
                    if let Some(description) = description {
                        body["description"] = json!(description);
                    }
                    if let Some(text) = text {
                        body["text"] = json!(text);
                    }
                    if !hit_breakpoint_ids.is_empty() {
                        body["hitBreakpointIds"] = json!(hit_breakpoint_ids);
                    }
                    send_event(&tx, &seq, "stopped", Some(body));
                }
                EngineEvent::Output { text, is_stderr } => {
                    let category = if is_stderr { "stderr" } else { "stdout" };
                    send_event(
                        &tx,
                        &seq,
                        "output",
                        Some(json!({ "category": category, "output": text })),
                    );
                }
            }
        }
    })
}

fn spawn_reclaim_task(engine: Arc<DebugEngine>) -> JoinHandle<()> {
    let period = engine.options().reclaim_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            engine.reclaim();
        }
    })
}
