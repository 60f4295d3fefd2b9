//! Interpreter runners.
//!
//! A runner launches one interpreter process per run and exposes it as a
//! [`RunHandle`]: a stream of [`DriverFrame`]s plus a way to answer input
//! requests. The engine only talks to this seam, so tests can substitute a
//! scripted runner for the real interpreter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::normalizer::NormalizedCode;
use crate::rewriter::RewrittenProgram;

pub mod protocol;
pub mod python;

pub use protocol::DriverFrame;
pub use python::LocalPythonRunner;

/// File name attributed to submitted code in compiler messages and tracebacks.
pub const SNIPPET_FILENAME: &str = "<snippet>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Run the snippet as a module, capturing output until completion.
    Direct,
    /// Run the rewritten program on an event loop with live I/O.
    Interactive,
}

/// Everything the driver needs to run one snippet. Serialized as the job line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJob {
    pub mode: RunMode,
    /// Normalized snippet; compiled before anything runs.
    pub source: String,
    /// Rewritten program for interactive runs.
    pub program: Option<String>,
    pub filename: String,
}

impl RunJob {
    pub fn direct(code: &NormalizedCode) -> Self {
        Self {
            mode: RunMode::Direct,
            source: code.as_str().to_string(),
            program: None,
            filename: SNIPPET_FILENAME.to_string(),
        }
    }

    pub fn interactive(code: &NormalizedCode, program: RewrittenProgram) -> Self {
        Self {
            mode: RunMode::Interactive,
            source: code.as_str().to_string(),
            program: Some(program.text),
            filename: SNIPPET_FILENAME.to_string(),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.mode == RunMode::Interactive
    }
}

/// A live interpreter running one job.
#[async_trait]
pub trait RunHandle: Send {
    /// Next frame from the driver, or `None` once the interpreter has exited.
    async fn next_frame(&mut self) -> Result<Option<DriverFrame>, EngineError>;

    /// Answer the outstanding input request.
    async fn reply(&mut self, value: &str) -> Result<(), EngineError>;

    /// Stop the interpreter. Safe to call after it has exited.
    async fn kill(&mut self);
}

#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn launch(&self, job: &RunJob) -> Result<Box<dyn RunHandle>, EngineError>;
}
