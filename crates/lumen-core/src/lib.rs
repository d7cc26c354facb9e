//! Core shared types for Lumen.
//!
//! This crate is intentionally small: everything here is needed by both the
//! debugging engine and the protocol layer, and none of it touches threads.

mod attach;
mod paths;
mod sanitize;

pub use attach::AttachArgs;
pub use paths::{canonicalize_path, PathMapper, PathTransform};
pub use sanitize::sanitize_json_error_message;

/// Identifier the debuggee uses for one of its worker threads.
pub type ThreadId = i64;

/// Reserved thread id meaning "every thread" in `pause` requests.
pub const ALL_THREADS_ID: ThreadId = 1;
