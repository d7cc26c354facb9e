//! A small line-oriented script interpreter that plays the debuggee.
//!
//! The adapter binary uses it so there is something to debug; integration
//! tests use it to drive real worker threads through the hot path. Each script
//! runs on its own OS thread and calls into the [`SuspendCoordinator`] before
//! every statement.

mod interp;
mod syntax;
mod value;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use lumen_core::canonicalize_path;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::runtime::{
    DebuggeeRuntime, ExecutionContext, FrameInfo, ScopeInfo, ThreadId, ThreadInfo,
    ValueRef,
};
use crate::suspend::SuspendCoordinator;

use interp::{evaluate, Interpreter};
pub use syntax::SyntaxError;
use syntax::{parse_expression, parse_program, Program};
use value::{DemoRef, DemoScope};

/// First id handed to a demo thread. Ids below it are reserved by the protocol.
pub const FIRST_THREAD_ID: ThreadId = 10;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("{file}:{error}")]
    Parse { file: String, error: SyntaxError },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn demo thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("no script loaded for {0}")]
    UnknownScript(String),
}

struct DemoFrame {
    function: String,
    file: String,
    line: u32,
    /// `None` for the top-level frame, whose variables live in `globals`.
    locals: Option<Arc<DemoScope>>,
    args: Option<Arc<DemoScope>>,
}

/// Execution state of one demo thread.
pub struct DemoContext {
    id: ThreadId,
    name: String,
    /// Outermost first.
    frames: Mutex<Vec<DemoFrame>>,
    globals: Arc<DemoScope>,
}

impl DemoContext {
    fn new(id: ThreadId, name: String) -> Self {
        Self {
            id,
            name,
            frames: Mutex::new(Vec::new()),
            globals: Arc::new(DemoScope::default()),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn push_frame(&self, function: &str, file: &str, args: Option<Vec<(String, DemoRef)>>) {
        let (locals, args) = match args {
            Some(bound) => (
                Some(Arc::new(DemoScope::default())),
                Some(Arc::new(DemoScope::with_vars(bound))),
            ),
            None => (None, None),
        };
        self.frames.lock().push(DemoFrame {
            function: function.to_string(),
            file: file.to_string(),
            line: 0,
            locals,
            args,
        });
    }

    fn pop_frame(&self) {
        self.frames.lock().pop();
    }

    fn set_line(&self, line: u32) {
        if let Some(frame) = self.frames.lock().last_mut() {
            frame.line = line;
        }
    }

    /// Resolve `name` in the frame `frame_index` levels out from the innermost.
    fn lookup(&self, frame_index: usize, name: &str) -> Option<DemoRef> {
        let frames = self.frames.lock();
        let frame = frames.iter().rev().nth(frame_index)?;
        frame
            .locals
            .as_ref()
            .and_then(|scope| scope.get(name))
            .or_else(|| frame.args.as_ref().and_then(|scope| scope.get(name)))
            .or_else(|| self.globals.get(name))
    }

    fn assign(&self, name: &str, value: DemoRef) {
        let frames = self.frames.lock();
        match frames.last() {
            Some(DemoFrame {
                locals: Some(locals),
                args,
                ..
            }) => match args {
                Some(args) if args.contains(name) => args.set(name, value),
                _ => locals.set(name, value),
            },
            _ => self.globals.set(name, value),
        }
    }

    fn stack_trace(&self) -> String {
        self.frames
            .lock()
            .iter()
            .rev()
            .map(|frame| format!("  at {} ({}:{})", frame.function, frame.file, frame.line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn scope(name: &str, value: &Arc<DemoScope>) -> ScopeInfo {
    let value: ValueRef = value.clone();
    ScopeInfo {
        name: name.to_string(),
        value,
    }
}

impl ExecutionContext for DemoContext {
    fn thread_id(&self) -> ThreadId {
        self.id
    }

    fn thread_name(&self) -> String {
        self.name.clone()
    }

    fn frames(&self) -> Vec<FrameInfo> {
        self.frames
            .lock()
            .iter()
            .rev()
            .map(|frame| {
                let mut scopes = Vec::with_capacity(3);
                if let Some(locals) = &frame.locals {
                    scopes.push(scope("Local", locals));
                }
                if let Some(args) = &frame.args {
                    scopes.push(scope("Arguments", args));
                }
                scopes.push(scope("Variables", &self.globals));
                FrameInfo {
                    function: frame.function.clone(),
                    file: frame.file.clone(),
                    line: frame.line,
                    scopes,
                }
            })
            .collect()
    }

    fn evaluate(&self, frame_index: usize, expression: &str) -> Result<ValueRef, String> {
        let expr = parse_expression(expression)?;
        if self.frames.lock().len() <= frame_index {
            return Err(format!("no frame at index {frame_index}"));
        }
        let value: ValueRef = evaluate(&expr, &|name: &str| self.lookup(frame_index, name))?;
        Ok(value)
    }

    fn resumed(&self) {
        tracing::trace!(target: "lumen.demo", thread = %self.name, "resumed");
    }
}

/// Loaded scripts plus the threads currently running them.
pub struct DemoRuntime {
    coordinator: Arc<SuspendCoordinator>,
    case_sensitive: bool,
    /// Keyed by canonical path.
    scripts: RwLock<HashMap<String, Arc<Program>>>,
    threads: Mutex<HashMap<ThreadId, String>>,
    next_thread: AtomicI64,
    wait_for_attach: AtomicBool,
}

impl DemoRuntime {
    pub fn new(coordinator: Arc<SuspendCoordinator>, case_sensitive: bool) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            case_sensitive,
            scripts: RwLock::new(HashMap::new()),
            threads: Mutex::new(HashMap::new()),
            next_thread: AtomicI64::new(FIRST_THREAD_ID),
            wait_for_attach: AtomicBool::new(false),
        })
    }

    /// Hold newly spawned threads until a client attaches.
    pub fn set_wait_for_attach(&self, wait: bool) {
        self.wait_for_attach.store(wait, Ordering::SeqCst);
    }

    /// Parse `source` and register it under `path`. Reloading a path replaces
    /// the program for threads spawned afterwards.
    pub fn load(&self, path: &str, source: &str) -> Result<(), DemoError> {
        let program = parse_program(path, source).map_err(|error| DemoError::Parse {
            file: path.to_string(),
            error,
        })?;
        let lines = program.executable_lines().len();
        self.scripts
            .write()
            .insert(canonicalize_path(path, self.case_sensitive), Arc::new(program));
        tracing::info!(target: "lumen.demo", path, lines, "script loaded");
        Ok(())
    }

    pub fn load_file(&self, path: &Path) -> Result<String, DemoError> {
        let source = std::fs::read_to_string(path).map_err(|source| DemoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let display = path.to_string_lossy().into_owned();
        self.load(&display, &source)?;
        Ok(display)
    }

    fn program(&self, path: &str) -> Option<Arc<Program>> {
        self.scripts
            .read()
            .get(&canonicalize_path(path, self.case_sensitive))
            .cloned()
    }

    /// Run the script loaded at `path` on a new OS thread.
    pub fn spawn(self: &Arc<Self>, path: &str, thread_name: &str) -> Result<JoinHandle<()>, DemoError> {
        let program = self
            .program(path)
            .ok_or_else(|| DemoError::UnknownScript(path.to_string()))?;
        let id = self.next_thread.fetch_add(1, Ordering::SeqCst);
        let ctx = Arc::new(DemoContext::new(id, thread_name.to_string()));
        self.threads.lock().insert(id, thread_name.to_string());

        let runtime = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                if runtime.wait_for_attach.load(Ordering::SeqCst) {
                    while !runtime.coordinator.is_attached() {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                }
                tracing::debug!(target: "lumen.demo", thread_id = id, file = %program.file, "thread started");
                Interpreter::new(runtime.coordinator.clone(), ctx, program).run();
                runtime.threads.lock().remove(&id);
                runtime.coordinator.thread_exited(id);
                tracing::debug!(target: "lumen.demo", thread_id = id, "thread finished");
            });

        spawned.map_err(|err| {
            self.threads.lock().remove(&id);
            DemoError::Spawn(err)
        })
    }
}

impl DebuggeeRuntime for DemoRuntime {
    fn threads(&self) -> Vec<ThreadInfo> {
        self.threads
            .lock()
            .iter()
            .map(|(id, name)| ThreadInfo {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }

    fn executable_lines(&self, path: &str) -> Vec<u32> {
        self.scripts
            .read()
            .get(path)
            .map(|program| program.executable_lines())
            .unwrap_or_default()
    }

    fn known_files(&self) -> Vec<String> {
        let mut files: Vec<_> = self.scripts.read().keys().cloned().collect();
        files.sort();
        files
    }
}
