//! JSON messages exchanged with dashboard clients.
//!
//! Clients submit code and answer input requests; the server streams
//! interactive output, asks for input and closes every run with one
//! `execution_result` (or an `error` when the engine itself failed).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core_types::{Bindings, EngineEvent, ExecutionResult};
use crate::errors::EngineError;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Invalid JSON message: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Unsupported message: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Execute { code: String },
    Input { value: String },
}

#[derive(Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let raw: RawClientMessage = serde_json::from_str(text)?;
        match (raw.kind.as_deref(), raw.code) {
            (Some("input"), _) => Ok(ClientMessage::Input {
                value: match raw.value {
                    Some(Value::String(value)) => value,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
            }),
            (None | Some("execute_code"), Some(code)) => Ok(ClientMessage::Execute { code }),
            (None | Some("execute_code"), None) => {
                Err(WireError::Unsupported("submission without code".to_string()))
            }
            (Some(other), _) => Err(WireError::Unsupported(format!("unknown message type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InteractiveOutput { content: String },
    InteractiveInputRequest { content: String },
    ExecutionResult(ResultPayload),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPayload {
    pub success: bool,
    pub output: String,
    /// Seconds with three decimals and an `s` suffix, e.g. `0.012s`.
    pub execution_time: String,
    #[serde(flatten)]
    pub detail: ResultDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultDetail {
    Success {
        interactive: bool,
        variables: Bindings,
    },
    Error {
        error_type: String,
        error: String,
        traceback: Option<String>,
        suggestion: String,
        line: Option<u32>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { error: message.into() }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<EngineEvent> for ServerMessage {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::Output(output) => ServerMessage::InteractiveOutput {
                content: output.content,
            },
            EngineEvent::InputRequested { prompt } => ServerMessage::InteractiveInputRequest { content: prompt },
        }
    }
}

impl From<ExecutionResult> for ServerMessage {
    fn from(result: ExecutionResult) -> Self {
        let execution_time = format!("{:.3}s", result.duration().as_secs_f64());
        let payload = match result {
            ExecutionResult::Success {
                output,
                interactive,
                bindings,
                ..
            } => ResultPayload {
                success: true,
                output,
                execution_time,
                detail: ResultDetail::Success {
                    interactive,
                    variables: bindings,
                },
            },
            ExecutionResult::Failure {
                error_type,
                message,
                line,
                suggestion,
                traceback,
                output,
                ..
            } => ResultPayload {
                success: false,
                output,
                execution_time,
                detail: ResultDetail::Error {
                    error_type,
                    error: message,
                    traceback,
                    suggestion,
                    line,
                },
            },
        };
        ServerMessage::ExecutionResult(payload)
    }
}

impl From<&EngineError> for ServerMessage {
    fn from(error: &EngineError) -> Self {
        ServerMessage::error(error.to_string())
    }
}
