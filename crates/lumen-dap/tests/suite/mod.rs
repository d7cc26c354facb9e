// Consolidated integration test suite, compiled by `tests/session.rs`.
mod attach;
mod breakpoints;
mod config;
mod exceptions;
mod inspection;
mod protocol;
mod stepping;
mod threads;
