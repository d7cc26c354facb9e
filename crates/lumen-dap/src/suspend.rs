//! The suspend decision engine and the table of blocked threads.
//!
//! Debuggee worker threads call [`SuspendCoordinator::check_suspend`] before
//! every executable line. When nothing could possibly stop a thread (no
//! client, no breakpoints, no stepping, no pause, no uncaught-exception
//! breaking) the call is a single atomic load.
//!
//! When a thread must stop it records itself in the suspended table, notifies
//! the session, and parks on its own [`ResumeGate`] with no lock held. Only a
//! matching [`SuspendCoordinator::resume`] (or session teardown) opens the
//! gate.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::mpsc;

use crate::breakpoints::{BreakpointHit, BreakpointRegistry};
use crate::function_breakpoints::FunctionBreakpoints;
use crate::runtime::{truthy, ContextRef, DebugException, ExecutionContext, ThreadId};
use crate::step::{StepController, StepMode};

/// `pause` target meaning every thread.
const PAUSE_ALL: ThreadId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    FunctionBreakpoint,
    Step,
    Exception,
    Pause,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::FunctionBreakpoint => "function breakpoint",
            StopReason::Step => "step",
            StopReason::Exception => "exception",
            StopReason::Pause => "pause",
        }
    }
}

/// Notifications from the debuggee side to the protocol session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Stopped {
        thread_id: ThreadId,
        reason: StopReason,
        description: Option<String>,
        /// Exception message for exception stops.
        text: Option<String>,
        hit_breakpoint_ids: Vec<u64>,
    },
    Output {
        text: String,
        is_stderr: bool,
    },
}

/// Copy-on-write map keyed by thread. Emptiness is a single atomic load, so
/// the hot path only reaches the lock when some thread has an entry.
struct PerThread<V> {
    entries: RwLock<Arc<HashMap<ThreadId, V>>>,
    len: AtomicUsize,
}

impl<V: Clone> PerThread<V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(HashMap::new())),
            len: AtomicUsize::new(0),
        }
    }

    fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    fn contains(&self, thread_id: ThreadId) -> bool {
        !self.is_empty() && self.entries.read().contains_key(&thread_id)
    }

    fn publish(&self, f: impl FnOnce(&mut HashMap<ThreadId, V>) -> Option<V>) -> Option<V> {
        let mut entries = self.entries.write();
        let mut next = HashMap::clone(&entries);
        let out = f(&mut next);
        self.len.store(next.len(), Ordering::Release);
        *entries = Arc::new(next);
        out
    }

    fn insert(&self, thread_id: ThreadId, value: V) {
        self.publish(|map| map.insert(thread_id, value));
    }

    fn remove(&self, thread_id: ThreadId) -> Option<V> {
        if !self.contains(thread_id) {
            return None;
        }
        self.publish(|map| map.remove(&thread_id))
    }

    fn clear(&self) {
        if !self.is_empty() {
            self.publish(|map| {
                map.clear();
                None
            });
        }
    }
}

/// What a stop reports to the client.
struct Stop {
    reason: StopReason,
    label: Option<String>,
    exception: Option<Arc<DebugException>>,
    breakpoint_id: Option<u64>,
}

impl Stop {
    fn new(reason: StopReason) -> Self {
        Self {
            reason,
            label: None,
            exception: None,
            breakpoint_id: None,
        }
    }
}

#[derive(Default)]
struct ResumeGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl ResumeGate {
    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }
}

/// Where and why a thread is blocked.
#[derive(Clone)]
pub struct SuspendedThread {
    pub thread_id: ThreadId,
    pub file: String,
    pub line: u32,
    pub reason: StopReason,
    pub label: Option<String>,
    pub exception: Option<Arc<DebugException>>,
    pub context: ContextRef,
    gate: Arc<ResumeGate>,
}

impl std::fmt::Debug for SuspendedThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendedThread")
            .field("thread_id", &self.thread_id)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("reason", &self.reason)
            .field("label", &self.label)
            .field("exception", &self.exception)
            .finish_non_exhaustive()
    }
}

pub struct SuspendCoordinator {
    breakpoints: BreakpointRegistry,
    functions: FunctionBreakpoints,
    steps: StepController,

    attached: AtomicBool,
    break_on_uncaught: AtomicBool,
    console_output: AtomicBool,
    has_suspend_conditions: AtomicBool,
    refresh_lock: Mutex<()>,

    pauses: PerThread<()>,
    pending_exceptions: PerThread<Arc<DebugException>>,
    suspended: Mutex<HashMap<ThreadId, SuspendedThread>>,
    events: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

impl SuspendCoordinator {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            breakpoints: BreakpointRegistry::new(case_sensitive),
            functions: FunctionBreakpoints::new(),
            steps: StepController::new(),
            attached: AtomicBool::new(false),
            break_on_uncaught: AtomicBool::new(false),
            console_output: AtomicBool::new(false),
            has_suspend_conditions: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
            pauses: PerThread::new(),
            pending_exceptions: PerThread::new(),
            suspended: Mutex::new(HashMap::new()),
            events: Mutex::new(None),
        }
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn function_breakpoints(&self) -> &FunctionBreakpoints {
        &self.functions
    }

    pub fn steps(&self) -> &StepController {
        &self.steps
    }

    /// Recompute the hot-path fast flag. Call after any state change that can
    /// make a suspend possible or impossible.
    pub fn refresh(&self) {
        let _guard = self.refresh_lock.lock();
        let active = self.attached.load(Ordering::SeqCst)
            && (!self.breakpoints.is_empty()
                || !self.functions.is_empty()
                || self.break_on_uncaught.load(Ordering::SeqCst)
                || !self.steps.is_empty()
                || !self.pauses.is_empty()
                || !self.pending_exceptions.is_empty());
        self.has_suspend_conditions.store(active, Ordering::SeqCst);
    }

    pub fn has_suspend_conditions(&self) -> bool {
        self.has_suspend_conditions.load(Ordering::Acquire)
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Start routing stop and output notifications to `events`.
    pub fn attach(&self, events: mpsc::UnboundedSender<EngineEvent>, console_output: bool) {
        *self.events.lock() = Some(events);
        self.console_output.store(console_output, Ordering::SeqCst);
        self.attached.store(true, Ordering::SeqCst);
        self.refresh();
        tracing::info!(console_output, "debugger client attached");
    }

    /// Tear down the client session: every blocked thread is released and all
    /// transient state is dropped. Breakpoints are kept but stay inactive until
    /// the next attach.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
        self.break_on_uncaught.store(false, Ordering::SeqCst);
        self.console_output.store(false, Ordering::SeqCst);
        self.events.lock().take();
        let released = self.resume_all();
        tracing::info!(released, "debugger client detached");
    }

    pub fn set_break_on_uncaught(&self, enabled: bool) {
        self.break_on_uncaught.store(enabled, Ordering::SeqCst);
        self.refresh();
        tracing::info!(enabled, "break on uncaught exceptions");
    }

    pub fn break_on_uncaught(&self) -> bool {
        self.break_on_uncaught.load(Ordering::SeqCst) && self.is_attached()
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Hot path: called by a debuggee thread before executing `file:line`.
    ///
    /// Blocks the calling thread if it must stop, and returns `true` once it
    /// has been resumed. Never panics into the caller.
    pub fn check_suspend(&self, ctx: &ContextRef, file: &str, line: u32) -> bool {
        if !self.has_suspend_conditions() {
            return false;
        }

        let decision = catch_unwind(AssertUnwindSafe(|| self.decide(ctx.as_ref(), file, line)));
        match decision {
            Ok(Some(stop)) => self.suspend(ctx, file, line, stop),
            Ok(None) => false,
            Err(_) => {
                tracing::error!(file, line, "suspend check panicked; continuing without suspending");
                false
            }
        }
    }

    fn decide(&self, ctx: &dyn ExecutionContext, file: &str, line: u32) -> Option<Stop> {
        let thread_id = ctx.thread_id();

        if let Some(exception) = self.pending_exceptions.remove(thread_id) {
            self.refresh();
            return Some(Stop {
                exception: Some(exception),
                ..Stop::new(StopReason::Exception)
            });
        }

        if let Some(id) = self.hit(ctx, self.breakpoints.check(file, line)) {
            return Some(Stop {
                breakpoint_id: Some(id),
                ..Stop::new(StopReason::Breakpoint)
            });
        }

        if self.consume_pause(thread_id) {
            return Some(Stop::new(StopReason::Pause));
        }

        let step = self.steps.get(thread_id)?;
        step.should_stop(ctx.call_depth())
            .then(|| Stop::new(StopReason::Step))
    }

    /// Id of the breakpoint behind `hit` if it fires for `ctx`.
    fn hit(&self, ctx: &dyn ExecutionContext, hit: BreakpointHit) -> Option<u64> {
        match hit {
            BreakpointHit::None => None,
            BreakpointHit::Unconditional(id) => Some(id),
            BreakpointHit::Conditional(id, condition) => {
                self.evaluate_condition(ctx, &condition).then_some(id)
            }
        }
    }

    fn evaluate_condition(&self, ctx: &dyn ExecutionContext, condition: &str) -> bool {
        match ctx.evaluate(0, condition).and_then(|value| truthy(value.as_ref())) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(condition, error = %err, "breakpoint condition failed; not stopping");
                false
            }
        }
    }

    fn consume_pause(&self, thread_id: ThreadId) -> bool {
        if self.pauses.is_empty() {
            return false;
        }
        let consumed = self.pauses.remove(thread_id).is_some()
            || self.pauses.remove(PAUSE_ALL).is_some();
        if consumed {
            self.refresh();
        }
        consumed
    }

    /// Called on function entry. Stops on a matching function breakpoint.
    pub fn on_function_entry(
        &self,
        ctx: &ContextRef,
        function: &str,
        component: Option<&str>,
        file: &str,
        line: u32,
    ) -> bool {
        if !self.has_suspend_conditions() {
            return false;
        }
        let hit = catch_unwind(AssertUnwindSafe(|| {
            self.hit(ctx.as_ref(), self.functions.check(function, component))
        }))
        .unwrap_or_else(|_| {
            tracing::error!(function, "function entry check panicked; continuing without suspending");
            None
        });
        let Some(id) = hit else {
            return false;
        };
        tracing::info!(function, component = ?component, id, "function breakpoint hit");
        let stop = Stop {
            breakpoint_id: Some(id),
            ..Stop::new(StopReason::FunctionBreakpoint)
        };
        self.suspend(ctx, file, line, stop)
    }

    /// An explicit break requested by debuggee code. `label` is shown to the
    /// client as the stop description.
    pub fn programmatic_break(
        &self,
        ctx: &ContextRef,
        file: &str,
        line: u32,
        label: Option<&str>,
    ) -> bool {
        if !self.is_attached() {
            return false;
        }
        let stop = Stop {
            label: label.map(str::to_string),
            ..Stop::new(StopReason::Breakpoint)
        };
        self.suspend(ctx, file, line, stop)
    }

    /// Pre-check for an exception about to propagate. Returns `true` if the
    /// thread should stop; the exception is then reported by the next
    /// [`check_suspend`](Self::check_suspend) on that thread.
    pub fn notify_exception(&self, thread_id: ThreadId, exception: DebugException, caught: bool) -> bool {
        tracing::debug!(
            thread_id,
            caught,
            exception = %exception.type_name,
            "exception raised in debuggee"
        );
        if caught || !self.break_on_uncaught() {
            return false;
        }
        self.pending_exceptions.insert(thread_id, Arc::new(exception));
        self.refresh();
        true
    }

    /// Forward debuggee console output when the client asked for it.
    pub fn emit_output(&self, text: &str, is_stderr: bool) {
        if !self.is_attached() || !self.console_output.load(Ordering::SeqCst) {
            return;
        }
        self.emit(EngineEvent::Output {
            text: text.to_string(),
            is_stderr,
        });
    }

    fn suspend(&self, ctx: &ContextRef, file: &str, line: u32, stop: Stop) -> bool {
        let thread_id = ctx.thread_id();
        let Stop {
            reason,
            label,
            exception,
            breakpoint_id,
        } = stop;

        // Any stop satisfies an outstanding step or targeted pause.
        self.steps.take(thread_id);
        self.pauses.remove(thread_id);
        self.refresh();

        let (description, text) = match &exception {
            Some(exception) => (
                Some(format!("{}: {}", exception.type_name, exception.message)),
                Some(exception.message.clone()),
            ),
            None => (label.clone(), None),
        };

        let gate = Arc::new(ResumeGate::default());
        {
            let mut suspended = self.suspended.lock();
            // Checked under the table lock so a concurrent detach either sees
            // this entry or we see the detach.
            if !self.attached.load(Ordering::SeqCst) {
                return false;
            }
            suspended.insert(
                thread_id,
                SuspendedThread {
                    thread_id,
                    file: file.to_string(),
                    line,
                    reason,
                    label: label.clone(),
                    exception,
                    context: ctx.clone(),
                    gate: gate.clone(),
                },
            );
        }

        tracing::info!(thread_id, file, line, reason = reason.as_str(), "thread suspended");
        self.emit(EngineEvent::Stopped {
            thread_id,
            reason,
            description,
            text,
            hit_breakpoint_ids: breakpoint_id.into_iter().collect(),
        });

        gate.wait();
        tracing::debug!(thread_id, "thread resumed");
        true
    }

    /// Release one blocked thread. Returns `false` if it was not suspended.
    pub fn resume(&self, thread_id: ThreadId) -> bool {
        let entry = self.suspended.lock().remove(&thread_id);
        match entry {
            Some(entry) => {
                Self::release(entry);
                true
            }
            None => {
                tracing::warn!(thread_id, "resume requested for a thread that is not suspended");
                false
            }
        }
    }

    fn release(entry: SuspendedThread) {
        entry.gate.open();
        entry.context.resumed();
    }

    /// Install stepping state for a suspended thread and release it.
    pub fn step(&self, thread_id: ThreadId, mode: StepMode) -> bool {
        let Some(ctx) = self.context(thread_id) else {
            tracing::warn!(thread_id, ?mode, "step requested for a thread that is not suspended");
            return false;
        };
        self.steps.start_stepping(thread_id, mode, ctx.call_depth());
        self.refresh();
        self.resume(thread_id)
    }

    /// Ask `thread_id` (or every thread, for `0` or the reserved virtual id)
    /// to stop the next time it reaches the hot path.
    pub fn request_pause(&self, thread_id: ThreadId) {
        let target = if thread_id == PAUSE_ALL || thread_id == lumen_core::ALL_THREADS_ID {
            PAUSE_ALL
        } else {
            thread_id
        };
        self.pauses.insert(target, ());
        self.refresh();
        tracing::info!(thread_id = target, "pause requested");
    }

    /// Release every blocked thread and drop step, pause, and pending
    /// exception state. Returns how many threads were released.
    pub fn resume_all(&self) -> usize {
        let drained: Vec<SuspendedThread> = self.suspended.lock().drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for entry in drained {
            Self::release(entry);
        }
        self.steps.clear();
        self.pauses.clear();
        self.pending_exceptions.clear();
        self.refresh();
        count
    }

    /// Drop per-thread state of a debuggee thread that has finished.
    pub fn thread_exited(&self, thread_id: ThreadId) {
        let step = self.steps.take(thread_id);
        let paused = self.pauses.remove(thread_id);
        let exception = self.pending_exceptions.remove(thread_id);
        if step.is_some() || paused.is_some() || exception.is_some() {
            tracing::debug!(thread_id, "dropped stop state of exited thread");
            self.refresh();
        }
    }

    pub fn suspended(&self, thread_id: ThreadId) -> Option<SuspendedThread> {
        self.suspended.lock().get(&thread_id).cloned()
    }

    pub fn is_suspended(&self, thread_id: ThreadId) -> bool {
        self.suspended.lock().contains_key(&thread_id)
    }

    pub fn suspended_ids(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.suspended.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn context(&self, thread_id: ThreadId) -> Option<ContextRef> {
        self.suspended.lock().get(&thread_id).map(|t| t.context.clone())
    }
}

impl Drop for SuspendCoordinator {
    fn drop(&mut self) {
        self.resume_all();
    }
}
