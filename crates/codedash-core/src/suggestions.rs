//! Failure kinds and the remediation hints attached to them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a failed run, named after the interpreter's exception class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ErrorKind {
    NameError,
    TypeError,
    /// Also covers `TabError`.
    IndentationError,
    SyntaxError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    /// Also covers `ModuleNotFoundError`.
    ImportError,
    Other(String),
}

impl ErrorKind {
    pub fn from_exception(name: &str) -> Self {
        match name {
            "NameError" | "UnboundLocalError" => ErrorKind::NameError,
            "TypeError" => ErrorKind::TypeError,
            "IndentationError" | "TabError" => ErrorKind::IndentationError,
            "SyntaxError" => ErrorKind::SyntaxError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            "IndexError" => ErrorKind::IndexError,
            "KeyError" => ErrorKind::KeyError,
            "AttributeError" => ErrorKind::AttributeError,
            "ImportError" | "ModuleNotFoundError" => ErrorKind::ImportError,
            other => ErrorKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::IndentationError => "IndentationError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::Other(name) => name,
        }
    }

    fn hint(&self) -> &'static str {
        match self {
            ErrorKind::NameError => {
                "Make sure all variables are defined before use. Check for typos in variable names."
            }
            ErrorKind::TypeError => {
                "Check that you're using compatible types and correct number of arguments."
            }
            ErrorKind::IndentationError => "Fix the indentation of your code. Use consistent spaces or tabs.",
            ErrorKind::SyntaxError => "Check for missing colons, parentheses, or quotes.",
            ErrorKind::ZeroDivisionError => "Avoid dividing by zero. Add a check for zero before division.",
            ErrorKind::IndexError => "Make sure you're not trying to access list indices that don't exist.",
            ErrorKind::KeyError => "Verify that the dictionary key exists before accessing it.",
            ErrorKind::AttributeError => {
                "Check that the object has the attribute or method you're trying to use."
            }
            ErrorKind::ImportError => "Ensure the module is installed and imported correctly.",
            ErrorKind::Other(_) => "Review the error message and check your code logic.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorKind {
    fn from(name: String) -> Self {
        ErrorKind::from_exception(&name)
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Remediation hint for a failure, followed by the failure's own message.
pub fn suggestion_for(kind: &ErrorKind, message: &str) -> String {
    format!("{}\nError details: {}", kind.hint(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_by_zero_hint() {
        let suggestion = suggestion_for(&ErrorKind::ZeroDivisionError, "division by zero");
        assert_eq!(
            suggestion,
            "Avoid dividing by zero. Add a check for zero before division.\nError details: division by zero"
        );
    }

    #[test]
    fn subclasses_share_their_parent_hint() {
        assert_eq!(ErrorKind::from_exception("TabError"), ErrorKind::IndentationError);
        assert_eq!(ErrorKind::from_exception("ModuleNotFoundError"), ErrorKind::ImportError);
        assert!(suggestion_for(&ErrorKind::from_exception("ModuleNotFoundError"), "No module named 'x'")
            .starts_with("Ensure the module is installed"));
    }

    #[test]
    fn unknown_kinds_get_the_generic_hint() {
        let kind = ErrorKind::from_exception("ValueError");
        assert_eq!(kind, ErrorKind::Other("ValueError".to_string()));
        assert_eq!(kind.as_str(), "ValueError");
        assert_eq!(
            suggestion_for(&kind, "bad value"),
            "Review the error message and check your code logic.\nError details: bad value"
        );
    }

    #[test]
    fn every_suggestion_ends_with_the_message() {
        let kinds = [
            ErrorKind::NameError,
            ErrorKind::TypeError,
            ErrorKind::IndentationError,
            ErrorKind::SyntaxError,
            ErrorKind::ZeroDivisionError,
            ErrorKind::IndexError,
            ErrorKind::KeyError,
            ErrorKind::AttributeError,
            ErrorKind::ImportError,
            ErrorKind::Other("RuntimeError".into()),
        ];
        for kind in kinds {
            let suggestion = suggestion_for(&kind, "");
            assert!(suggestion.ends_with("\nError details: "), "{}", kind);
            assert_eq!(suggestion.lines().count(), 2);
        }
    }

    #[test]
    fn serializes_as_the_exception_name() {
        assert_eq!(serde_json::to_string(&ErrorKind::KeyError).unwrap(), "\"KeyError\"");
        let kind: ErrorKind = serde_json::from_str("\"RecursionError\"").unwrap();
        assert_eq!(kind, ErrorKind::Other("RecursionError".into()));
    }
}
