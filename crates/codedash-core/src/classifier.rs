//! Interactivity detection for normalized snippets.
//!
//! A snippet is run in interactive mode when it may block waiting for the
//! user. This is a textual heuristic, not a parse: a call to `input(` or a
//! `while True:` loop anywhere in the text (comments and strings included)
//! selects interactive mode. Input read through other means, such as
//! `sys.stdin.readline()`, is not detected.

use std::sync::OnceLock;

use regex::Regex;

use crate::normalizer::NormalizedCode;

/// Matches a free call of the blocking input primitive.
fn input_call_pattern() -> &'static Regex {
    static INPUT: OnceLock<Regex> = OnceLock::new();
    INPUT.get_or_init(|| Regex::new(r"(?m)(^|[^\w.])input\s*\(").expect("input pattern is valid"))
}

fn unbounded_loop_pattern() -> &'static Regex {
    static LOOP: OnceLock<Regex> = OnceLock::new();
    LOOP.get_or_init(|| {
        Regex::new(r"(?m)(^|[^\w.])while\s*\(?\s*(True|1)\s*\)?\s*:").expect("loop pattern is valid")
    })
}

/// Why a snippet was classified the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interactivity {
    pub reads_input: bool,
    pub loops_forever: bool,
}

impl Interactivity {
    pub fn is_interactive(&self) -> bool {
        self.reads_input || self.loops_forever
    }
}

pub fn classify(code: &NormalizedCode) -> Interactivity {
    let text = code.as_str();
    Interactivity {
        reads_input: input_call_pattern().is_match(text),
        loops_forever: unbounded_loop_pattern().is_match(text),
    }
}

pub fn is_interactive(code: &NormalizedCode) -> bool {
    classify(code).is_interactive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    fn interactive(src: &str) -> bool {
        is_interactive(&normalize(src))
    }

    #[test]
    fn input_call_is_interactive() {
        assert!(interactive("name = input('Name: ')\nprint(name)"));
        assert!(interactive("n = int(input())"));
        assert!(interactive("input ('press enter')"));
    }

    #[test]
    fn infinite_loop_is_interactive() {
        let c = classify(&normalize("while True:\n    pass"));
        assert!(c.loops_forever);
        assert!(!c.reads_input);
        assert!(c.is_interactive());
        assert!(interactive("while 1:\n    break"));
        assert!(interactive("x = 0\nwhile (True):\n    x += 1"));
    }

    #[test]
    fn plain_code_is_not_interactive() {
        assert!(!interactive("1 + 1"));
        assert!(!interactive("def f(x):\n    return x\nprint(f(2))"));
        assert!(!interactive("while x < 10:\n    x += 1"));
    }

    #[test]
    fn similarly_named_calls_are_ignored() {
        assert!(!interactive("user_input('a')"));
        assert!(!interactive("form.input('a')"));
        assert!(!interactive("while Truthy:\n    pass"));
    }
}
