//! Breakpoints on function entry, matched by name.
//!
//! Names compare case-insensitively. `Component.method` restricts a match to
//! one component, and a trailing `*` turns the name into a prefix. The set is
//! always replaced wholesale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::breakpoints::BreakpointHit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBreakpointSpec {
    pub name: String,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionBreakpoint {
    pub id: u64,
    pub name: String,
    pub verified: bool,
}

#[derive(Debug, Default)]
struct Entry {
    id: u64,
    // Lowercase; without the trailing `*` for wildcards.
    name: String,
    component: Option<String>,
    wildcard: bool,
    condition: Option<String>,
}

#[derive(Debug)]
struct Snapshot {
    entries: Vec<Entry>,
    min_len: usize,
    max_len: usize,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            min_len: usize::MAX,
            max_len: 0,
        }
    }
}

pub struct FunctionBreakpoints {
    snapshot: RwLock<Arc<Snapshot>>,
    next_id: AtomicU64,
}

impl Default for FunctionBreakpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionBreakpoints {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn replace(&self, specs: &[FunctionBreakpointSpec]) -> Vec<FunctionBreakpoint> {
        let mut snapshot = Snapshot::empty();
        let mut created = Vec::with_capacity(specs.len());

        for spec in specs {
            let full = spec.name.trim();
            let (component, function) = match full.rfind('.') {
                Some(dot) if dot > 0 => (Some(full[..dot].to_lowercase()), &full[dot + 1..]),
                _ => (None, full),
            };
            let wildcard = function.ends_with('*');
            let name = function.trim_end_matches('*').to_lowercase();

            snapshot.min_len = snapshot.min_len.min(name.len());
            snapshot.max_len = if wildcard {
                usize::MAX
            } else {
                snapshot.max_len.max(name.len())
            };
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            snapshot.entries.push(Entry {
                id,
                name,
                component,
                wildcard,
                condition: spec
                    .condition
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
            });
            created.push(FunctionBreakpoint {
                id,
                name: full.to_string(),
                verified: true,
            });
        }

        tracing::debug!(count = created.len(), "function breakpoints replaced");
        *self.snapshot.write() = Arc::new(snapshot);
        created
    }

    pub fn clear(&self) {
        *self.snapshot.write() = Arc::new(Snapshot::empty());
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().entries.is_empty()
    }

    /// Hot-path lookup on function entry.
    pub fn check(&self, function: &str, component: Option<&str>) -> BreakpointHit {
        let snapshot = self.snapshot.read().clone();
        let len = function.len();
        if snapshot.entries.is_empty() || len < snapshot.min_len || len > snapshot.max_len {
            return BreakpointHit::None;
        }

        let function = function.to_lowercase();
        let component = component.map(str::to_lowercase);
        for entry in &snapshot.entries {
            if let Some(wanted) = &entry.component {
                if component.as_ref() != Some(wanted) {
                    continue;
                }
            }
            let matched = if entry.wildcard {
                function.starts_with(&entry.name)
            } else {
                function == entry.name
            };
            if matched {
                return match &entry.condition {
                    Some(condition) => BreakpointHit::Conditional(entry.id, condition.clone()),
                    None => BreakpointHit::Unconditional(entry.id),
                };
            }
        }
        BreakpointHit::None
    }
}
