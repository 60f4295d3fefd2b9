//! Configuration type definitions
//!
//! Every section is optional in YAML; a missing section or field takes the
//! default shown by the matching `default_*` function.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CodedashConfig {
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the interpreter child process is launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterpreterConfig {
    /// Executable name looked up on `PATH`, or a path.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments placed before the driver.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory shared by all runs. Each run gets a fresh temporary
    /// directory when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutionConfig {
    /// Wall-clock limit for one run. Runs are unbounded when unset.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

impl ExecutionConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
    /// Allowed CORS origins. Any origin is allowed when unset.
    #[serde(default)]
    pub cors_origins: Option<Vec<String>>,
    /// Log every HTTP request with a request id.
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_command() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    // Unbuffered, so output reaches the protocol stream as it is produced.
    vec!["-u".to_string()]
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: default_true(),
            cors_origins: None,
            log_requests: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

impl CodedashConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.interpreter.command.trim().is_empty() {
            return Err(EngineError::Config("Interpreter command cannot be empty".to_string()));
        }

        if let Some(dir) = &self.interpreter.working_dir {
            if !dir.is_dir() {
                return Err(EngineError::Config(format!(
                    "Interpreter working directory {} does not exist",
                    dir.display()
                )));
            }
        }

        if self.execution.run_timeout_secs == Some(0) {
            return Err(EngineError::Config(
                "execution.run_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(EngineError::Config(format!(
                "Invalid server bind address: {}",
                self.server.bind_addr
            )));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(EngineError::Config(format!(
                "Unknown log level '{}'. Valid levels: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}
