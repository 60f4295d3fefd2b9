//! Configuration loader for YAML files and environment overrides

use std::env;
use std::path::Path;
use tokio::fs;

use crate::config::types::CodedashConfig;
use crate::errors::EngineError;

pub const ENV_PYTHON: &str = "CODEDASH_PYTHON";
pub const ENV_BIND_ADDR: &str = "CODEDASH_BIND_ADDR";
pub const ENV_LOG_LEVEL: &str = "CODEDASH_LOG_LEVEL";

pub struct ConfigLoader;

impl ConfigLoader {
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CodedashConfig, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            EngineError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    /// Parse YAML, apply environment overrides and validate.
    pub fn from_str(content: &str) -> Result<CodedashConfig, EngineError> {
        let mut config: CodedashConfig = if content.trim().is_empty() {
            CodedashConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| EngineError::Config(format!("Failed to parse YAML config: {}", e)))?
        };
        Self::apply_environment(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<CodedashConfig, EngineError> {
        Self::from_str("")
    }

    fn apply_environment(config: &mut CodedashConfig) {
        if let Some(command) = non_empty_var(ENV_PYTHON) {
            log::debug!("Using interpreter '{}' from {}", command, ENV_PYTHON);
            config.interpreter.command = command;
        }
        if let Some(bind_addr) = non_empty_var(ENV_BIND_ADDR) {
            config.server.bind_addr = bind_addr;
        }
        if let Some(level) = non_empty_var(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
