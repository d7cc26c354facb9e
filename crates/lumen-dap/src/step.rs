use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::runtime::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Into,
    Over,
    Out,
}

impl StepMode {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "stepIn" => Some(StepMode::Into),
            "next" => Some(StepMode::Over),
            "stepOut" => Some(StepMode::Out),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepState {
    pub thread_id: ThreadId,
    pub mode: StepMode,
    pub start_depth: usize,
}

impl StepState {
    /// Whether a thread stepping with this state should stop at `depth`.
    pub fn should_stop(&self, depth: usize) -> bool {
        match self.mode {
            StepMode::Into => true,
            StepMode::Over => depth <= self.start_depth,
            StepMode::Out => depth < self.start_depth,
        }
    }
}

/// Per-thread stepping state, at most one entry per thread.
///
/// Copy-on-write like the breakpoint registry: readers clone the current map
/// `Arc`, writers publish a new map.
#[derive(Default)]
pub struct StepController {
    states: RwLock<Arc<HashMap<ThreadId, StepState>>>,
}

impl StepController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install stepping state for `thread_id`, replacing any previous state.
    pub fn start_stepping(&self, thread_id: ThreadId, mode: StepMode, depth: usize) {
        let mut states = self.states.write();
        let mut next = HashMap::clone(&states);
        next.insert(
            thread_id,
            StepState {
                thread_id,
                mode,
                start_depth: depth,
            },
        );
        *states = Arc::new(next);
        tracing::debug!(thread_id, ?mode, depth, "start stepping");
    }

    /// Remove and return the state of `thread_id`.
    pub fn take(&self, thread_id: ThreadId) -> Option<StepState> {
        if !self.states.read().contains_key(&thread_id) {
            return None;
        }
        let mut states = self.states.write();
        let mut next = HashMap::clone(&states);
        let removed = next.remove(&thread_id);
        *states = Arc::new(next);
        removed
    }

    pub fn get(&self, thread_id: ThreadId) -> Option<StepState> {
        self.states.read().get(&thread_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    pub fn clear(&self) {
        *self.states.write() = Arc::new(HashMap::new());
    }
}
