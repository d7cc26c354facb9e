//! Lumen debugging engine and Debug Adapter Protocol server.
//!
//! This crate provides:
//! - A lock-light suspend coordinator that debuggee worker threads call into
//!   before every executable line, with source, function and exception
//!   breakpoints plus stepping and pause.
//! - A value tracker that hands out stable, reclaimable variable references.
//! - A DAP server over stdio or TCP that drives all of the above.

pub mod breakpoints;
pub mod dap_tokio;
pub mod engine;
pub mod error;
pub mod function_breakpoints;
pub mod hardening;
pub mod pin_cache;
pub mod render;
pub mod runtime;
pub mod step;
pub mod suspend;
pub mod threads;
pub mod values;
pub mod wire_server;

/// Script interpreter used as a debuggee by the adapter binary and the tests.
pub mod demo;

pub use crate::engine::{DebugEngine, EngineOptions};
pub use crate::error::{EngineError, EngineResult};
pub use crate::runtime::{
    ContextRef, DebugException, DebugValue, DebuggeeRuntime, ExecutionContext, FrameInfo,
    Inspection, ScopeInfo, ThreadInfo, ValueRef,
};
pub use crate::suspend::{EngineEvent, StopReason, SuspendCoordinator};
