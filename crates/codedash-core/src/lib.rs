//! Execution engine for the codedash snippet dashboard.
//!
//! Clients submit code copied out of a conversation: fenced, oddly indented
//! and sometimes waiting for keyboard input. The engine cleans it up, decides
//! whether it needs a live input channel, runs it in a fresh interpreter and
//! reports either the captured output and final bindings or a classified
//! failure with a remediation hint.
//!
//! # Architecture Overview
//!
//! - **Normalization**: fence stripping and indentation re-basing (`normalizer`)
//! - **Classification**: textual detection of interactive snippets (`classifier`)
//! - **Rewriting**: routing input and print through the session (`rewriter`)
//! - **Execution**: one run per session, driven over a line protocol (`engine`, `executors`)
//! - **Routing**: per-session sinks and input waiters (`router`)
//! - **Reporting**: failure hints and the client wire format (`suggestions`, `wire`)

pub mod classifier;
pub mod config;
pub mod core_types;
pub mod engine;
pub mod errors;
pub mod executors;
pub mod normalizer;
pub mod rewriter;
pub mod router;
pub mod suggestions;
pub mod wire;

pub use config::*;
pub use core_types::{Bindings, EngineEvent, ExecutionResult, OutputEvent, OutputStream};
pub use engine::ExecutionEngine;
pub use errors::EngineError;
pub use executors::{CodeRunner, LocalPythonRunner, RunHandle};
pub use router::{RunState, SessionId};
pub use suggestions::ErrorKind;
pub use wire::{ClientMessage, ServerMessage};

#[cfg(test)]
pub mod test_utils;
