//! Core type definitions shared by the engine, the router and the runners
//!
//! A run produces an ordered stream of output events and, at the end, exactly
//! one `ExecutionResult`. Interactive runs also surface input requests to the
//! session while they are suspended.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::suggestions::ErrorKind;

/// Final, stringified values of the top-level names a run created.
pub type Bindings = BTreeMap<String, String>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub stream: OutputStream,
    pub content: String,
}

impl OutputEvent {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            content: content.into(),
        }
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            content: content.into(),
        }
    }
}

/// Live notifications forwarded to a session while an interactive run is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Output(OutputEvent),
    InputRequested { prompt: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success {
        output: String,
        duration: Duration,
        interactive: bool,
        bindings: Bindings,
    },
    Failure {
        /// Exception class name as the interpreter reported it.
        error_type: String,
        /// Category used to pick the hint.
        error_kind: ErrorKind,
        message: String,
        /// Line in the submitted snippet, when the failure can be attributed to one.
        line: Option<u32>,
        suggestion: String,
        traceback: Option<String>,
        /// Output produced before the failure.
        output: String,
        duration: Duration,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn output(&self) -> &str {
        match self {
            ExecutionResult::Success { output, .. } | ExecutionResult::Failure { output, .. } => output,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ExecutionResult::Success { duration, .. } | ExecutionResult::Failure { duration, .. } => *duration,
        }
    }

    pub fn error_kind(&self) -> Option<&ErrorKind> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { error_kind, .. } => Some(error_kind),
        }
    }
}
