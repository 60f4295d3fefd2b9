//! Frames the driver reports on its protocol stream, one JSON object per line.

use serde::{Deserialize, Serialize};

use crate::core_types::{Bindings, OutputStream};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriverFrame {
    /// The snippet compiled; the run is starting.
    Compiled,
    /// The snippet (or the program built from it) did not compile. Terminal.
    SyntaxError {
        error_type: String,
        message: String,
        #[serde(default)]
        line: Option<u32>,
    },
    Output {
        stream: OutputStream,
        content: String,
    },
    /// The run is blocked until a reply line arrives.
    InputRequest {
        #[serde(default)]
        prompt: String,
    },
    /// The run finished normally. Terminal.
    Completed {
        #[serde(default)]
        bindings: Bindings,
    },
    /// The run raised. Terminal.
    Raised {
        error_type: String,
        message: String,
        #[serde(default)]
        traceback: String,
        #[serde(default)]
        line: Option<u32>,
    },
}

impl DriverFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DriverFrame::SyntaxError { .. } | DriverFrame::Completed { .. } | DriverFrame::Raised { .. }
        )
    }
}

/// Reply to an input request, written to the driver's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputReply<'a> {
    pub value: &'a str,
}
