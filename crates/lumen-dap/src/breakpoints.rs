//! Line breakpoints, checked on every executed line.
//!
//! Readers never lock for longer than an `Arc` clone: every mutation builds a
//! fresh [`Snapshot`] (parallel arrays plus precomputed bounds) and swaps it in
//! whole, so a worker thread sees either the old or the new set, never a mix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lumen_core::canonicalize_path;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// A breakpoint as reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub id: u64,
    /// Canonical debuggee-side path.
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub verified: bool,
}

/// Result of a hot-path [`BreakpointRegistry::check`]. Hits carry the id of
/// the matching breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointHit {
    None,
    Unconditional(u64),
    Conditional(u64, String),
}

#[derive(Debug, Default)]
struct Snapshot {
    // Bound breakpoints only; these drive `check`.
    ids: Vec<u64>,
    lines: Vec<u32>,
    files: Vec<String>,
    conditions: Vec<Option<String>>,
    min_line: u32,
    max_line: u32,
    max_path_len: usize,
    // Every breakpoint, bound or not, for reporting.
    all: Vec<Breakpoint>,
}

impl Snapshot {
    fn from_breakpoints(all: Vec<Breakpoint>) -> Self {
        let mut snapshot = Snapshot {
            min_line: u32::MAX,
            ..Snapshot::default()
        };
        for bp in all.iter().filter(|bp| bp.verified) {
            snapshot.ids.push(bp.id);
            snapshot.lines.push(bp.line);
            snapshot.files.push(bp.file.clone());
            snapshot.conditions.push(bp.condition.clone());
            snapshot.min_line = snapshot.min_line.min(bp.line);
            snapshot.max_line = snapshot.max_line.max(bp.line);
            snapshot.max_path_len = snapshot.max_path_len.max(bp.file.len());
        }
        snapshot.all = all;
        snapshot
    }
}

/// A requested line breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBreakpoint {
    pub line: u32,
    pub condition: Option<String>,
}

pub struct BreakpointRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
    case_sensitive: bool,
}

impl BreakpointRegistry {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::from_breakpoints(Vec::new()))),
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            case_sensitive,
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<Breakpoint>)) {
        let _guard = self.write_lock.lock();
        let mut all = self.current().all.clone();
        f(&mut all);
        *self.snapshot.write() = Arc::new(Snapshot::from_breakpoints(all));
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn normalize_condition(condition: Option<&str>) -> Option<String> {
        condition
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    /// Add a bound breakpoint and return its id.
    pub fn add(&self, file: &str, line: u32, condition: Option<&str>) -> u64 {
        let bp = Breakpoint {
            id: self.next_id(),
            file: canonicalize_path(file, self.case_sensitive),
            line,
            condition: Self::normalize_condition(condition),
            verified: true,
        };
        let id = bp.id;
        self.mutate(|all| all.push(bp));
        id
    }

    /// Remove the breakpoints at exactly (`file`, `line`). Returns whether
    /// anything was removed.
    pub fn remove(&self, file: &str, line: u32) -> bool {
        let file = canonicalize_path(file, self.case_sensitive);
        let mut removed = false;
        self.mutate(|all| {
            let before = all.len();
            all.retain(|bp| !(bp.line == line && bp.file == file));
            removed = all.len() != before;
        });
        removed
    }

    pub fn clear_for_file(&self, file: &str) {
        let file = canonicalize_path(file, self.case_sensitive);
        self.mutate(|all| all.retain(|bp| bp.file != file));
    }

    pub fn clear_all(&self) {
        self.mutate(Vec::clear);
    }

    /// Replace every breakpoint of `file` in one step.
    ///
    /// Requested lines found in `valid_lines` are bound; the rest are kept as
    /// unverified and never fire. Every breakpoint gets a fresh id.
    pub fn replace_for_file(
        &self,
        file: &str,
        requested: &[SourceBreakpoint],
        valid_lines: &[u32],
    ) -> Vec<Breakpoint> {
        let file = canonicalize_path(file, self.case_sensitive);
        let created: Vec<Breakpoint> = requested
            .iter()
            .map(|req| Breakpoint {
                id: self.next_id(),
                file: file.clone(),
                line: req.line,
                condition: Self::normalize_condition(req.condition.as_deref()),
                verified: valid_lines.contains(&req.line),
            })
            .collect();

        self.mutate(|all| {
            all.retain(|bp| bp.file != file);
            all.extend(created.iter().cloned());
        });
        created
    }

    /// Hot-path lookup for a debuggee-side `file` and `line`.
    pub fn check(&self, file: &str, line: u32) -> BreakpointHit {
        let snapshot = self.current();
        if snapshot.lines.is_empty() || line < snapshot.min_line || line > snapshot.max_line {
            return BreakpointHit::None;
        }

        let mut canonical: Option<String> = None;
        for (idx, &bp_line) in snapshot.lines.iter().enumerate() {
            if bp_line != line {
                continue;
            }
            let canonical =
                canonical.get_or_insert_with(|| canonicalize_path(file, self.case_sensitive));
            if canonical.len() > snapshot.max_path_len {
                return BreakpointHit::None;
            }
            if snapshot.files[idx] == *canonical {
                let id = snapshot.ids[idx];
                return match &snapshot.conditions[idx] {
                    Some(condition) => BreakpointHit::Conditional(id, condition.clone()),
                    None => BreakpointHit::Unconditional(id),
                };
            }
        }
        BreakpointHit::None
    }

    /// Number of bound breakpoints.
    pub fn len(&self) -> usize {
        self.current().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every breakpoint, bound or not.
    pub fn all(&self) -> Vec<Breakpoint> {
        self.current().all.clone()
    }
}
