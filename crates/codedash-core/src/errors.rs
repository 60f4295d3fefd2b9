//! Error types for engine faults
//!
//! Failures of the submitted code itself (syntax errors, exceptions) are not
//! errors at this level: they are reported as `ExecutionResult::Failure`.
//! `EngineError` covers everything else, from rejected submissions to an
//! interpreter that cannot be launched or that breaks the driver protocol.

use std::time::Duration;

use thiserror::Error;

use crate::router::SessionId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session {0} already has an execution in progress")]
    SessionBusy(SessionId),
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("Failed to launch interpreter: {0}")]
    Launch(String),
    #[error("Interpreter protocol error: {0}")]
    Protocol(String),
    #[error("Execution was cancelled: {0}")]
    Cancelled(String),
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the error rejected the submission before anything ran.
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::SessionBusy(_) | EngineError::UnknownSession(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::SessionBusy(_) => "session_busy",
            EngineError::UnknownSession(_) => "unknown_session",
            EngineError::Launch(_) => "launch_error",
            EngineError::Protocol(_) => "protocol_error",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::Timeout(_) => "timeout",
            EngineError::Config(_) => "config_error",
            EngineError::Io(_) => "io_error",
            EngineError::Json(_) => "json_error",
        }
    }
}
