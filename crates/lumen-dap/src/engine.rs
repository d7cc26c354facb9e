//! Session-level engine: the state behind every DAP request.
//!
//! The wire server is a thin translation layer over [`DebugEngine`]. All paths
//! stored here are canonical debuggee-side paths; client paths exist only in
//! request arguments and in the rows produced for responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lumen_config::LumenConfig;
use lumen_core::{AttachArgs, PathMapper, ALL_THREADS_ID};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::breakpoints::{Breakpoint, SourceBreakpoint};
use crate::error::{EngineError, EngineResult};
use crate::function_breakpoints::{FunctionBreakpoint, FunctionBreakpointSpec};
use crate::pin_cache::ExpiringLruCache;
use crate::render::{Inspector, Synthetic, Variable, VariablesFilter};
use crate::runtime::{DebuggeeRuntime, FrameInfo, ThreadId, ValueRef};
use crate::step::StepMode;
use crate::suspend::{EngineEvent, SuspendCoordinator};
use crate::threads::{sort_threads, ThreadRow, ALL_THREADS_NAME};
use crate::values::{ValueTracker, NO_CHILDREN};

/// Exception filter id advertised in `initialize`.
pub const UNCAUGHT_FILTER: &str = "uncaught";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub case_sensitive: bool,
    /// `None` rejects every attach.
    pub expected_secret: Option<String>,
    pub pin_cache_size: usize,
    pub pin_ttl: Duration,
    pub reclaim_interval: Duration,
}

impl EngineOptions {
    pub fn from_config(config: &LumenConfig) -> Self {
        Self {
            case_sensitive: config.paths.case_sensitive,
            expected_secret: config.dap.expected_secret(),
            pin_cache_size: config.inspection.pin_cache_size,
            pin_ttl: config.inspection.pin_ttl(),
            reclaim_interval: config.inspection.reclaim_interval(),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&LumenConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub name: String,
    pub path: String,
}

impl SourceRef {
    fn for_path(path: String) -> Self {
        let name = path.rsplit(['/', '\\']).next().unwrap_or_default().to_string();
        Self { name, path }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrameRow {
    pub id: i64,
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub source: SourceRef,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRow {
    pub name: String,
    pub variables_reference: u64,
    pub expensive: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub variables_reference: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub named_variables: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<usize>,
}

impl From<Variable> for EvaluateResult {
    fn from(variable: Variable) -> Self {
        Self {
            result: variable.value,
            type_name: variable.type_name,
            variables_reference: variable.variables_reference,
            named_variables: variable.named_variables,
            indexed_variables: variable.indexed_variables,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub message: String,
    pub type_name: String,
    pub stack_trace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_exception: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub exception_id: String,
    pub description: String,
    pub break_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingRow {
    pub file: String,
    pub line: u32,
    pub id: u64,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointBindings {
    pub canonical_filenames: Vec<String>,
    pub breakpoints: Vec<BindingRow>,
    pub path_transforms: Vec<String>,
}

#[derive(Debug, Clone)]
struct FrameEntry {
    thread_id: ThreadId,
    /// Index into the context's own frame list, for evaluation.
    index: usize,
    top: bool,
    frame: FrameInfo,
}

/// Frame ids and exception scopes of suspended threads. Both live until the
/// thread resumes; repeated queries during one suspension reuse them.
#[derive(Default)]
struct FrameTable {
    next_id: i64,
    frames: HashMap<i64, FrameEntry>,
    by_position: HashMap<(ThreadId, usize), i64>,
    exception_scopes: HashMap<ThreadId, ValueRef>,
}

impl FrameTable {
    fn insert(&mut self, entry: FrameEntry) -> i64 {
        let key = (entry.thread_id, entry.index);
        let id = match self.by_position.get(&key) {
            Some(&id) => id,
            None => {
                self.next_id += 1;
                self.by_position.insert(key, self.next_id);
                self.next_id
            }
        };
        self.frames.insert(id, entry);
        id
    }

    fn forget_thread(&mut self, thread_id: ThreadId) {
        self.frames.retain(|_, entry| entry.thread_id != thread_id);
        self.by_position.retain(|(thread, _), _| *thread != thread_id);
        self.exception_scopes.remove(&thread_id);
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.by_position.clear();
        self.exception_scopes.clear();
    }
}

struct Session {
    paths: PathMapper,
}

pub struct DebugEngine {
    coordinator: Arc<SuspendCoordinator>,
    runtime: Arc<dyn DebuggeeRuntime>,
    values: ValueTracker,
    pins: ExpiringLruCache<u64, ValueRef>,
    frames: Mutex<FrameTable>,
    session: RwLock<Option<Session>>,
    options: EngineOptions,
}

impl DebugEngine {
    /// `coordinator` must be the one the runtime's threads report to.
    pub fn new(
        runtime: Arc<dyn DebuggeeRuntime>,
        coordinator: Arc<SuspendCoordinator>,
        options: EngineOptions,
    ) -> Self {
        Self {
            coordinator,
            runtime,
            values: ValueTracker::new(),
            pins: ExpiringLruCache::new(options.pin_cache_size, options.pin_ttl),
            frames: Mutex::new(FrameTable::default()),
            session: RwLock::new(None),
            options,
        }
    }

    pub fn coordinator(&self) -> &Arc<SuspendCoordinator> {
        &self.coordinator
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn values(&self) -> &ValueTracker {
        &self.values
    }

    pub fn is_attached(&self) -> bool {
        self.session.read().is_some()
    }

    fn inspector(&self) -> Inspector<'_> {
        Inspector::new(&self.values, &self.pins)
    }

    fn mapper(&self) -> EngineResult<PathMapper> {
        self.session
            .read()
            .as_ref()
            .map(|session| session.paths.clone())
            .ok_or(EngineError::NotAttached)
    }

    /// Mapper for output only; identity when no client is attached.
    fn display_mapper(&self) -> PathMapper {
        self.mapper()
            .unwrap_or_else(|_| PathMapper::new(Vec::new(), self.options.case_sensitive))
    }

    /// Validate the shared secret and start a session. On rejection nothing
    /// changes and the caller must end the connection.
    pub fn attach(
        &self,
        args: &AttachArgs,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> EngineResult<()> {
        let Some(expected) = self.options.expected_secret.as_deref() else {
            tracing::warn!("attach rejected: no debugger secret is configured");
            return Err(EngineError::AttachRejected(
                "no debugger secret is configured".to_string(),
            ));
        };
        if args.secret.as_deref() != Some(expected) {
            tracing::warn!(
                secret_supplied = args.secret.is_some(),
                "attach rejected: secret mismatch"
            );
            return Err(EngineError::AttachRejected("invalid secret".to_string()));
        }

        let paths = PathMapper::new(args.path_transforms.clone(), self.options.case_sensitive);
        for transform in paths.transforms() {
            tracing::info!(transform = %transform.trace_string(), "path transform");
        }
        *self.session.write() = Some(Session { paths });
        self.coordinator.attach(events, args.console_output);
        Ok(())
    }

    /// End the session. Every suspended thread is released; breakpoints are
    /// kept for the next client.
    pub fn detach(&self) {
        let was_attached = self.session.write().take().is_some();
        self.coordinator.detach();
        self.frames.lock().clear();
        self.pins.clear();
        self.values.clear();
        if was_attached {
            tracing::info!("session ended");
        }
    }

    pub fn set_breakpoints(
        &self,
        source_path: &str,
        requested: &[SourceBreakpoint],
    ) -> EngineResult<Vec<Breakpoint>> {
        let file = self.mapper()?.to_server(source_path);
        let valid_lines = self.runtime.executable_lines(&file);
        let breakpoints = self
            .coordinator
            .breakpoints()
            .replace_for_file(&file, requested, &valid_lines);
        self.coordinator.refresh();
        tracing::debug!(
            file,
            requested = requested.len(),
            bound = breakpoints.iter().filter(|bp| bp.verified).count(),
            "breakpoints replaced"
        );
        Ok(breakpoints)
    }

    pub fn set_function_breakpoints(
        &self,
        specs: &[FunctionBreakpointSpec],
    ) -> EngineResult<Vec<FunctionBreakpoint>> {
        self.mapper()?;
        let created = self.coordinator.function_breakpoints().replace(specs);
        self.coordinator.refresh();
        Ok(created)
    }

    pub fn set_exception_breakpoints(&self, filters: &[String]) -> EngineResult<()> {
        self.mapper()?;
        let enabled = filters.iter().any(|filter| filter == UNCAUGHT_FILTER);
        self.coordinator.set_break_on_uncaught(enabled);
        Ok(())
    }

    /// Executable lines of `source_path` within `line..=end_line`.
    pub fn breakpoint_locations(&self, source_path: &str, line: u32, end_line: Option<u32>) -> Vec<u32> {
        let file = self.display_mapper().to_server(source_path);
        let end = end_line.unwrap_or(line).max(line);
        let mut lines: Vec<u32> = self
            .runtime
            .executable_lines(&file)
            .into_iter()
            .filter(|candidate| (line..=end).contains(candidate))
            .collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }

    pub fn threads(&self) -> Vec<ThreadRow> {
        let mut rows: Vec<ThreadRow> = self
            .runtime
            .threads()
            .into_iter()
            .map(|thread| ThreadRow {
                id: thread.id,
                name: thread.name,
            })
            .collect();
        sort_threads(&mut rows);
        for row in &mut rows {
            if self.coordinator.is_suspended(row.id) {
                row.name.push_str(" (suspended)");
            }
        }
        rows.insert(
            0,
            ThreadRow {
                id: ALL_THREADS_ID,
                name: ALL_THREADS_NAME.to_string(),
            },
        );
        rows
    }

    /// Frames of a suspended thread, innermost first, plus the total count.
    /// Unknown or running threads yield no frames.
    pub fn stack_trace(
        &self,
        thread_id: ThreadId,
        start: usize,
        levels: Option<usize>,
    ) -> (Vec<StackFrameRow>, usize) {
        let Some(suspended) = self.coordinator.suspended(thread_id) else {
            tracing::debug!(thread_id, "stackTrace for a thread that is not suspended");
            return (Vec::new(), 0);
        };

        let mut frames: Vec<(usize, FrameInfo)> = suspended
            .context
            .frames()
            .into_iter()
            .enumerate()
            .filter(|(_, frame)| frame.line > 0)
            .collect();
        if frames.is_empty() {
            frames.push((
                0,
                FrameInfo {
                    function: suspended.context.thread_name(),
                    file: suspended.file.clone(),
                    line: suspended.line,
                    scopes: Vec::new(),
                },
            ));
        }

        let total = frames.len();
        let mapper = self.display_mapper();
        let levels = levels.filter(|&l| l > 0).unwrap_or(usize::MAX);
        let mut table = self.frames.lock();
        let rows = frames
            .into_iter()
            .enumerate()
            .skip(start)
            .take(levels)
            .map(|(position, (index, frame))| {
                let row_source = SourceRef::for_path(mapper.to_ide(&frame.file));
                let name = frame.function.clone();
                let line = frame.line;
                let id = table.insert(FrameEntry {
                    thread_id,
                    index,
                    top: position == 0,
                    frame,
                });
                StackFrameRow {
                    id,
                    name,
                    line,
                    column: 1,
                    source: row_source,
                }
            })
            .collect();
        (rows, total)
    }

    fn frame(&self, frame_id: i64) -> Option<FrameEntry> {
        self.frames.lock().frames.get(&frame_id).cloned()
    }

    /// Scopes of a frame. Each scope is registered so its children can be
    /// fetched by handle; an unknown frame yields no scopes.
    pub fn scopes(&self, frame_id: i64) -> Vec<ScopeRow> {
        let Some(entry) = self.frame(frame_id) else {
            tracing::debug!(frame_id, "scopes for unknown frame");
            return Vec::new();
        };

        let mut rows = Vec::new();
        let mut push = |name: &str, id: u64| {
            self.values.set_path(id, name);
            self.values.set_frame_id(id, frame_id);
            rows.push(ScopeRow {
                name: name.to_string(),
                variables_reference: id,
                expensive: false,
            });
        };

        if entry.top {
            let exception = self
                .coordinator
                .suspended(entry.thread_id)
                .and_then(|thread| thread.exception);
            if let Some(exception) = exception {
                let value = self
                    .frames
                    .lock()
                    .exception_scopes
                    .entry(entry.thread_id)
                    .or_insert_with(|| Arc::new(Synthetic::exception(&exception)) as ValueRef)
                    .clone();
                push("Exception", self.inspector().pin(value));
            }
        }
        for scope in &entry.frame.scopes {
            let id = self.values.register_or_get_id(&scope.value);
            push(&scope.name, id);
        }
        rows
    }

    pub fn variables(
        &self,
        variables_reference: u64,
        filter: VariablesFilter,
        start: Option<usize>,
        count: Option<usize>,
    ) -> Vec<Variable> {
        self.inspector()
            .children(variables_reference, filter, start, count)
    }

    pub fn evaluate(&self, frame_id: Option<i64>, expression: &str) -> EngineResult<EvaluateResult> {
        let frame_id = frame_id
            .ok_or_else(|| EngineError::InvalidRequest("evaluate requires a frameId".to_string()))?;
        let entry = self.frame(frame_id).ok_or(EngineError::UnknownFrame(frame_id))?;
        let context = self
            .coordinator
            .context(entry.thread_id)
            .ok_or(EngineError::UnknownThread(entry.thread_id))?;

        let value = context
            .evaluate(entry.index, expression)
            .map_err(EngineError::Evaluation)?;
        let variable = self.inspector().variable("result", &value);
        let reference = variable.variables_reference;
        // Evaluation results usually have no other owner. Tables are already
        // pinned as their synthetic rows.
        if reference != NO_CHILDREN && self.pins.get(&reference).is_none() {
            self.pins.put(reference, value);
        }
        Ok(variable.into())
    }

    /// Resume one thread, or every thread for `0` and the virtual all-threads
    /// id. Returns whether all threads were continued.
    pub fn continue_(&self, thread_id: ThreadId) -> EngineResult<bool> {
        if thread_id == 0 || thread_id == ALL_THREADS_ID {
            let released = self.coordinator.resume_all();
            self.frames.lock().clear();
            tracing::debug!(released, "continue all threads");
            return Ok(true);
        }
        self.frames.lock().forget_thread(thread_id);
        if self.coordinator.resume(thread_id) {
            Ok(false)
        } else {
            Err(EngineError::UnknownThread(thread_id))
        }
    }

    pub fn step(&self, thread_id: ThreadId, mode: StepMode) -> EngineResult<()> {
        self.frames.lock().forget_thread(thread_id);
        if self.coordinator.step(thread_id, mode) {
            Ok(())
        } else {
            Err(EngineError::UnknownThread(thread_id))
        }
    }

    pub fn pause(&self, thread_id: ThreadId) -> EngineResult<()> {
        self.mapper()?;
        let known = thread_id == 0
            || thread_id == ALL_THREADS_ID
            || self.runtime.threads().iter().any(|thread| thread.id == thread_id);
        if !known {
            return Err(EngineError::UnknownThread(thread_id));
        }
        self.coordinator.request_pause(thread_id);
        Ok(())
    }

    pub fn exception_info(&self, thread_id: ThreadId) -> ExceptionInfo {
        let exception = self
            .coordinator
            .suspended(thread_id)
            .and_then(|thread| thread.exception);
        let Some(exception) = exception else {
            return ExceptionInfo {
                exception_id: "unknown".to_string(),
                description: "No exception information available".to_string(),
                break_mode: "unhandled",
                details: None,
            };
        };

        let mut message = exception.message.clone();
        if let Some(detail) = exception.detail.as_deref().filter(|d| !d.is_empty()) {
            message.push_str("\n\nDetail: ");
            message.push_str(detail);
        }
        ExceptionInfo {
            exception_id: exception.type_name.clone(),
            description: exception.message.clone(),
            break_mode: "unhandled",
            details: Some(ExceptionDetails {
                message,
                type_name: exception.type_name.clone(),
                stack_trace: exception.stack_trace.clone(),
                inner_exception: exception.inner.clone(),
            }),
        }
    }

    pub fn breakpoint_bindings(&self) -> BreakpointBindings {
        let mut canonical_filenames = self.runtime.known_files();
        canonical_filenames.sort();
        let breakpoints = self
            .coordinator
            .breakpoints()
            .all()
            .into_iter()
            .map(|bp| BindingRow {
                file: bp.file,
                line: bp.line,
                id: bp.id,
                verified: bp.verified,
            })
            .collect();
        let path_transforms = self
            .display_mapper()
            .transforms()
            .iter()
            .map(|t| t.trace_string())
            .collect();
        BreakpointBindings {
            canonical_filenames,
            breakpoints,
            path_transforms,
        }
    }

    /// Client-side source path of the value behind a handle, if it has one.
    pub fn source_path(&self, variables_reference: u64) -> Option<String> {
        let value = self.values.get_by_id(variables_reference)?;
        let path = value.source_path()?;
        Some(self.display_mapper().to_ide(&path))
    }

    /// Sweep dropped values out of the handle tables and expire old pins.
    pub fn reclaim(&self) -> usize {
        let expired = self.pins.purge_expired();
        let removed = self.values.reclaim();
        if expired > 0 || removed > 0 {
            tracing::trace!(expired, removed, "inspection state reclaimed");
        }
        removed
    }
}

impl Drop for DebugEngine {
    fn drop(&mut self) {
        self.coordinator.resume_all();
    }
}
