use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::runtime::ThreadId;

pub const ALL_THREADS_NAME: &str = "All Threads";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadRow {
    pub id: ThreadId,
    pub name: String,
}

fn chunks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+|\D+").expect("valid regex"))
}

/// One run of a thread name. Digit runs sort before text runs.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    /// Significant digit count, then the digits without leading zeros.
    Number(usize, String),
    Text(String),
}

fn sort_key(name: &str) -> Vec<Chunk> {
    chunks()
        .find_iter(name)
        .map(|m| {
            let run = m.as_str();
            if run.starts_with(|c: char| c.is_ascii_digit()) {
                let digits = run.trim_start_matches('0');
                Chunk::Number(digits.len(), digits.to_string())
            } else {
                Chunk::Text(run.to_lowercase())
            }
        })
        .collect()
}

/// Case-insensitive name ordering where digit runs compare as numbers, so
/// `Worker-2` sorts before `Worker-12`.
pub fn compare_thread_names(a: &str, b: &str) -> Ordering {
    sort_key(a).cmp(&sort_key(b)).then_with(|| a.cmp(b))
}

pub fn sort_threads(rows: &mut [ThreadRow]) {
    rows.sort_by(|a, b| compare_thread_names(&a.name, &b.name).then(a.id.cmp(&b.id)));
}
