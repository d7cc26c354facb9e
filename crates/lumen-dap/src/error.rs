use thiserror::Error;

use crate::runtime::ThreadId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not attached")]
    NotAttached,

    #[error("attach rejected: {0}")]
    AttachRejected(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("thread {0} is not suspended")]
    UnknownThread(ThreadId),

    #[error("unknown frame id {0}")]
    UnknownFrame(i64),

    #[error("{0}")]
    Evaluation(String),

    #[error("internal error (panic) while handling {0}; the session continues")]
    Panicked(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
