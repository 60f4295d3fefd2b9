//! Snippet normalization
//!
//! Code arriving from a chat conversation is usually wrapped in markdown fences
//! and carries whatever indentation it had inside the surrounding answer. This
//! module removes the fences and re-bases the indentation so the snippet can be
//! compiled as a top-level module.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Code that went through [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedCode {
    text: String,
}

impl NormalizedCode {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

impl fmt::Display for NormalizedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for NormalizedCode {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    // A fence token, optionally followed by a language tag such as `python` or `py3`.
    FENCE.get_or_init(|| Regex::new(r"^\s*(```|~~~)[\w+.#-]*\s*$").expect("fence pattern is valid"))
}

/// Whether `line` opens or closes a markdown code fence.
pub fn is_fence_line(line: &str) -> bool {
    fence_pattern().is_match(line)
}

/// Number of leading whitespace characters.
pub fn indentation_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Strip fences and the common leading indentation from `raw`.
///
/// The base indentation is the indentation of the first non-blank line. Later
/// lines indented at least that much lose exactly `base` leading characters;
/// blank lines and lines indented less than the base are kept as they are.
pub fn normalize(raw: &str) -> NormalizedCode {
    let mut base: Option<usize> = None;
    let mut lines = Vec::new();

    for line in raw.split('\n').filter(|line| !is_fence_line(line)) {
        if line.trim().is_empty() {
            lines.push(line.to_string());
            continue;
        }

        let width = indentation_width(line);
        let base = *base.get_or_insert(width);
        if width >= base {
            lines.push(strip_chars(line, base).to_string());
        } else {
            lines.push(line.to_string());
        }
    }

    NormalizedCode {
        text: lines.join("\n"),
    }
}

fn strip_chars(line: &str, count: usize) -> &str {
    match line.char_indices().nth(count) {
        Some((idx, _)) => &line[idx..],
        None => "",
    }
}
