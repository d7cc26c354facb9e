//! The narrow interface the engine needs from a debuggee.
//!
//! Nothing in the engine depends on how the debuggee executes code. A runtime
//! hands the engine [`ExecutionContext`]s for its worker threads (which call
//! into [`crate::suspend::SuspendCoordinator`] before every executable line)
//! and answers line-validity and thread-listing queries through
//! [`DebuggeeRuntime`].

use std::fmt;
use std::sync::Arc;

pub use lumen_core::ThreadId;

/// Shared handle to a debuggee-side value.
pub type ValueRef = Arc<dyn DebugValue>;

/// Shared handle to a debuggee thread's execution context.
pub type ContextRef = Arc<dyn ExecutionContext>;

/// The shape of a value as the inspector sees it.
///
/// Children are returned as handles so the inspector can register them lazily,
/// only when the client expands the parent.
pub enum Inspection {
    Null,
    Bool(bool),
    /// Already formatted by the runtime.
    Number(String),
    String(String),
    Array(Vec<ValueRef>),
    Struct(Vec<(String, ValueRef)>),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<ValueRef>>,
    },
    Other {
        type_name: String,
        summary: String,
    },
}

pub trait DebugValue: Send + Sync {
    fn inspect(&self) -> Inspection;

    /// Source file this value was defined in (functions, components), as a
    /// debuggee-side path.
    fn source_path(&self) -> Option<String> {
        None
    }
}

/// Coerce a condition result to a boolean.
///
/// Booleans are taken as is, numbers are true when non-zero, and the strings
/// `true`/`yes`/`false`/`no` (or numeric strings) are accepted. Anything else
/// is an error.
pub fn truthy(value: &dyn DebugValue) -> Result<bool, String> {
    fn from_number(text: &str) -> Option<bool> {
        text.trim().parse::<f64>().ok().map(|n| n != 0.0)
    }

    match value.inspect() {
        Inspection::Bool(b) => Ok(b),
        Inspection::Number(text) => {
            from_number(&text).ok_or_else(|| format!("cannot convert number {text} to boolean"))
        }
        Inspection::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            other => from_number(other).ok_or_else(|| "cannot convert string to boolean".to_string()),
        },
        Inspection::Null => Err("cannot convert null to boolean".to_string()),
        Inspection::Array(_) => Err("cannot convert array to boolean".to_string()),
        Inspection::Struct(_) => Err("cannot convert struct to boolean".to_string()),
        Inspection::Table { .. } => Err("cannot convert table to boolean".to_string()),
        Inspection::Other { type_name, .. } => Err(format!("cannot convert {type_name} to boolean")),
    }
}

/// One named scope of a frame (`Local`, `Arguments`, ...).
#[derive(Clone)]
pub struct ScopeInfo {
    pub name: String,
    pub value: ValueRef,
}

impl fmt::Debug for ScopeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeInfo").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A call frame, innermost first in [`ExecutionContext::frames`].
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub function: String,
    /// Debuggee-side path.
    pub file: String,
    /// Zero for a frame that has been pushed but has not executed a line yet.
    pub line: u32,
    pub scopes: Vec<ScopeInfo>,
}

/// A debuggee thread as seen from the engine.
///
/// Implementations must tolerate being queried from the session thread while
/// the owning worker thread is blocked inside the hot-path check.
pub trait ExecutionContext: Send + Sync {
    fn thread_id(&self) -> ThreadId;

    fn thread_name(&self) -> String;

    /// Number of frames that have begun executing (frames with `line > 0`).
    fn call_depth(&self) -> usize {
        self.frames().iter().filter(|frame| frame.line > 0).count()
    }

    fn frames(&self) -> Vec<FrameInfo>;

    /// Evaluate `expression` in the frame at `frame_index` (0 = innermost).
    fn evaluate(&self, frame_index: usize, expression: &str) -> Result<ValueRef, String>;

    /// Called exactly once each time the thread is released from a suspension.
    fn resumed(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

/// Process-level queries against the debuggee.
pub trait DebuggeeRuntime: Send + Sync {
    /// Live debuggee threads, in any order.
    fn threads(&self) -> Vec<ThreadInfo>;

    /// Lines of `path` (canonical, debuggee-side) where execution can suspend.
    /// Empty when the file is unknown.
    fn executable_lines(&self, path: &str) -> Vec<u32>;

    /// Canonical paths of every file the runtime has loaded.
    fn known_files(&self) -> Vec<String> {
        Vec::new()
    }
}

/// An exception raised in the debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugException {
    pub type_name: String,
    pub message: String,
    pub detail: Option<String>,
    pub stack_trace: String,
    pub inner: Option<String>,
}

impl DebugException {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            detail: None,
            stack_trace: String::new(),
            inner: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }
}
