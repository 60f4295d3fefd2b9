//! Interactive rewriting
//!
//! Interactive snippets cannot block on the interpreter's own `input()`:
//! there is no terminal behind the process, only the session channel. The
//! rewriter turns free `input(...)` calls into
//! `await __codedash_io__.input(...)`, a coroutine on the I/O object the
//! driver injects, which suspends the run's event loop until the engine
//! answers. The driver compiles the result with top-level `await` allowed and
//! runs it in the module namespace, so names and scoping are exactly those of
//! the snippet. Output is not rewritten: the driver forwards every write to
//! stdout and stderr as it happens.
//!
//! A plain function whose own frame ends up awaiting is promoted to
//! `async def` and its calls are awaited, repeated until nothing changes. A
//! function is promoted only if every reference to it is a call that can be
//! awaited where it stands. Input read anywhere else (dunder methods,
//! generators, lambdas, comprehensions, class bodies, functions passed around
//! as values) is left as a plain `input()`, which the driver answers
//! synchronously over the same channel.
//!
//! The rewrite is lexical and only ever inserts text inside a line, so line
//! numbers carry over unchanged.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::normalizer::{indentation_width, NormalizedCode};

/// Name of the channel object the driver injects into interactive runs.
pub const IO_OBJECT: &str = "__codedash_io__";

/// The program an interactive run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenProgram {
    /// The snippet with awaits inserted, line for line.
    pub text: String,
    /// Functions promoted to coroutines, in promotion order.
    pub promoted: Vec<String>,
}

pub fn rewrite(code: &NormalizedCode) -> RewrittenProgram {
    let lines: Vec<String> = code.as_str().split('\n').map(str::to_string).collect();
    let source = Source::new(&lines);
    let promoted = source.plan_promotions();
    if !promoted.is_empty() {
        log::debug!("promoting to coroutines: {}", promoted.join(", "));
    }

    let rewritten: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let mut line = line.clone();
            for (pos, text) in source.insertions(idx, &promoted) {
                line.insert_str(pos, &text);
            }
            line
        })
        .collect();

    RewrittenProgram {
        text: rewritten.join("\n"),
        promoted,
    }
}

// ---------------------------------------------------------------------------
// Lexical scan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct LineScan {
    /// Byte ranges holding code, outside string literals and comments.
    code: Vec<Range<usize>>,
    /// The line starts inside a triple-quoted string.
    in_string: bool,
    /// Brackets left open by earlier lines.
    depth_at_start: usize,
    /// The previous line ended with a backslash.
    continued: bool,
    has_lambda: bool,
    /// A `for` inside brackets: a comprehension or generator expression.
    has_comprehension: bool,
}

impl LineScan {
    fn is_code(&self, pos: usize) -> bool {
        self.code.iter().any(|range| range.contains(&pos))
    }

    fn starts_statement(&self) -> bool {
        self.depth_at_start == 0 && !self.in_string && !self.continued
    }
}

#[derive(Debug, Clone, Copy)]
enum Lexer {
    Code,
    Str { quote: u8, triple: bool },
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn scan(lines: &[String]) -> Vec<LineScan> {
    let mut state = Lexer::Code;
    let mut depth = 0usize;
    let mut continued = false;
    let mut scans = Vec::with_capacity(lines.len());

    for line in lines {
        let bytes = line.as_bytes();
        let mut result = LineScan {
            in_string: matches!(state, Lexer::Str { .. }),
            depth_at_start: depth,
            continued,
            ..LineScan::default()
        };
        let mut code_start = matches!(state, Lexer::Code).then_some(0);
        let mut end = bytes.len();
        let mut i = 0;

        while i < bytes.len() {
            match state {
                Lexer::Code => match bytes[i] {
                    b'#' => {
                        end = i;
                        break;
                    }
                    quote @ (b'\'' | b'"') => {
                        if let Some(start) = code_start.take() {
                            if start < i {
                                result.code.push(start..i);
                            }
                        }
                        let triple = bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote);
                        state = Lexer::Str { quote, triple };
                        i += if triple { 3 } else { 1 };
                        continue;
                    }
                    b'(' | b'[' | b'{' => depth += 1,
                    b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                    b if is_identifier_byte(b) && (i == 0 || !is_identifier_byte(bytes[i - 1])) => {
                        let mut j = i;
                        while j < bytes.len() && is_identifier_byte(bytes[j]) {
                            j += 1;
                        }
                        match &line[i..j] {
                            "lambda" => result.has_lambda = true,
                            "for" if depth > 0 => result.has_comprehension = true,
                            _ => {}
                        }
                        i = j;
                        continue;
                    }
                    _ => {}
                },
                Lexer::Str { quote, triple } => {
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        let closes = !triple
                            || (bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote));
                        if closes {
                            i += if triple { 3 } else { 1 };
                            state = Lexer::Code;
                            code_start = Some(i);
                            continue;
                        }
                    }
                }
            }
            i += 1;
        }

        continued = false;
        match state {
            Lexer::Code => {
                if let Some(start) = code_start {
                    if start < end {
                        result.code.push(start..end);
                    }
                }
                continued = line[..end.min(line.len())].trim_end().ends_with('\\');
            }
            // An unterminated single-quoted string cannot span lines.
            Lexer::Str { triple: false, .. } => state = Lexer::Code,
            Lexer::Str { triple: true, .. } => {}
        }
        scans.push(result);
    }
    scans
}

/// Marks every line of a statement that holds a lambda or a comprehension.
/// Those introduce frames of their own where `await` cannot go.
fn sync_only_lines(scans: &[LineScan]) -> Vec<bool> {
    let mut flags = vec![false; scans.len()];
    let mut start = 0;
    for idx in 1..=scans.len() {
        if idx < scans.len() && !scans[idx].starts_statement() {
            continue;
        }
        let statement = start..idx;
        if statement
            .clone()
            .any(|line| scans[line].has_lambda || scans[line].has_comprehension)
        {
            for line in statement {
                flags[line] = true;
            }
        }
        start = idx;
    }
    flags
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn input_call() -> &'static Regex {
    static INPUT_CALL: OnceLock<Regex> = OnceLock::new();
    INPUT_CALL.get_or_init(|| Regex::new(r"\binput\s*\(").expect("input call pattern is valid"))
}

fn yield_keyword() -> &'static Regex {
    static YIELD: OnceLock<Regex> = OnceLock::new();
    YIELD.get_or_init(|| Regex::new(r"\byield\b").expect("yield pattern is valid"))
}

fn def_header() -> &'static Regex {
    static DEF: OnceLock<Regex> = OnceLock::new();
    DEF.get_or_init(|| {
        Regex::new(r"^(\s*)(async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("def pattern is valid")
    })
}

fn class_header() -> &'static Regex {
    static CLASS: OnceLock<Regex> = OnceLock::new();
    CLASS.get_or_init(|| Regex::new(r"^(\s*)class\s+([A-Za-z_]\w*)").expect("class pattern is valid"))
}

fn word(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(name))).ok()
}

fn preceded_by_keyword(line: &str, pos: usize, keyword: &str) -> bool {
    let before = line[..pos].trim_end();
    match before.strip_suffix(keyword) {
        Some(rest) => rest
            .bytes()
            .next_back()
            .map_or(true, |b| !is_identifier_byte(b)),
        None => false,
    }
}

fn is_definition(line: &str, pos: usize) -> bool {
    preceded_by_keyword(line, pos, "def") || preceded_by_keyword(line, pos, "class")
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn indentation_width_bytes(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn skip_spaces_back(bytes: &[u8], mut pos: usize) -> usize {
    while pos > 0 && bytes[pos - 1] == b' ' {
        pos -= 1;
    }
    pos
}

fn matching_open(bytes: &[u8], scan: &LineScan, close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for pos in (0..=close).rev() {
        if !scan.is_code(pos) {
            continue;
        }
        match bytes[pos] {
            b')' | b']' | b'}' => depth += 1,
            b'(' | b'[' | b'{' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }
    None
}

/// Start of the primary expression whose call begins with the name at
/// `pos`: `show(` starts at `show`, `game.show(` at `game`, `G().show(` and
/// `items[0].show(` at `G` and `items`. `None` when the receiver cannot be
/// delimited on this line.
fn primary_start(line: &str, scan: &LineScan, pos: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut start = pos;
    loop {
        let before = skip_spaces_back(bytes, start);
        if before == 0 || bytes[before - 1] != b'.' {
            return Some(start);
        }
        let mut i = skip_spaces_back(bytes, before - 1);
        loop {
            let c = bytes[i.checked_sub(1)?];
            if c == b')' || c == b']' {
                i = matching_open(bytes, scan, i - 1)?;
                match i.checked_sub(1).map(|p| bytes[p]) {
                    Some(p) if is_identifier_byte(p) || p == b')' || p == b']' => continue,
                    _ => break,
                }
            } else if is_identifier_byte(c) {
                while i > 0 && is_identifier_byte(bytes[i - 1]) {
                    i -= 1;
                }
                break;
            } else {
                return None;
            }
        }
        if !scan.is_code(i) {
            return None;
        }
        start = i;
    }
}

// ---------------------------------------------------------------------------
// Blocks and promotion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Function { is_async: bool },
    Class,
}

#[derive(Debug, Clone)]
struct Block {
    name: String,
    kind: BlockKind,
    line: usize,
    /// Lines whose statements run in this block's frame or a nested one. A
    /// one-line definition owns its header line.
    body: Range<usize>,
    decorated: bool,
}

fn find_blocks(lines: &[String], scans: &[LineScan]) -> Vec<Block> {
    let mut blocks = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if !scans[idx].starts_statement() || !scans[idx].is_code(indentation_width_bytes(line)) {
            continue;
        }
        let (name, kind) = if let Some(caps) = def_header().captures(line) {
            (
                caps[3].to_string(),
                BlockKind::Function {
                    is_async: caps.get(2).is_some(),
                },
            )
        } else if let Some(caps) = class_header().captures(line) {
            (caps[2].to_string(), BlockKind::Class)
        } else {
            continue;
        };

        let indent = indentation_width(line);
        let mut end = idx + 1;
        while end < lines.len() {
            let candidate = lines[end].trim_start();
            let closes = !candidate.is_empty()
                && !candidate.starts_with('#')
                && scans[end].starts_statement()
                && indentation_width(&lines[end]) <= indent;
            if closes {
                break;
            }
            end += 1;
        }
        let body = if lines[idx + 1..end].iter().all(|l| l.trim().is_empty()) {
            idx..idx + 1
        } else {
            idx + 1..end
        };

        blocks.push(Block {
            name,
            kind,
            line: idx,
            body,
            decorated: idx > 0 && lines[idx - 1].trim_start().starts_with('@'),
        });
    }
    blocks
}

struct Source<'a> {
    lines: &'a [String],
    scans: Vec<LineScan>,
    blocks: Vec<Block>,
    sync_only: Vec<bool>,
    /// Names defined as methods somewhere; only these are matched after a dot.
    methods: HashSet<String>,
    /// The snippet defines its own `input`.
    shadows_input: bool,
}

impl<'a> Source<'a> {
    fn new(lines: &'a [String]) -> Self {
        let scans = scan(lines);
        let blocks = find_blocks(lines, &scans);
        let sync_only = sync_only_lines(&scans);
        let shadows_input = blocks.iter().any(|block| block.name == "input");
        let mut source = Self {
            lines,
            scans,
            blocks,
            sync_only,
            methods: HashSet::new(),
            shadows_input,
        };
        let methods: HashSet<String> = source
            .blocks
            .iter()
            .filter(|block| {
                source
                    .blocks
                    .iter()
                    .filter(|outer| outer.line != block.line && outer.body.contains(&block.line))
                    .max_by_key(|outer| outer.line)
                    .map_or(false, |outer| outer.kind == BlockKind::Class)
            })
            .map(|block| block.name.clone())
            .collect();
        source.methods = methods;
        source
    }

    /// Innermost block whose frame runs line `idx`; `None` for module level.
    fn frame_of(&self, idx: usize) -> Option<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.body.contains(&idx))
            .max_by_key(|(_, block)| block.line)
            .map(|(i, _)| i)
    }

    fn own_lines(&self, block: usize) -> Vec<usize> {
        self.blocks[block]
            .body
            .clone()
            .filter(|&idx| self.frame_of(idx) == Some(block))
            .collect()
    }

    fn frame_allows_await(&self, frame: Option<usize>, promoted: &[String]) -> bool {
        match frame.map(|i| &self.blocks[i]) {
            None => true,
            Some(Block {
                kind: BlockKind::Function { is_async: true },
                ..
            }) => true,
            Some(Block {
                kind: BlockKind::Function { is_async: false },
                name,
                ..
            }) => promoted.contains(name),
            Some(Block {
                kind: BlockKind::Class, ..
            }) => false,
        }
    }

    fn can_await_at(&self, idx: usize, promoted: &[String]) -> bool {
        !self.sync_only[idx] && self.frame_allows_await(self.frame_of(idx), promoted)
    }

    /// Positions of free `input(` calls on line `idx`.
    fn input_calls(&self, idx: usize) -> Vec<usize> {
        if self.shadows_input {
            return Vec::new();
        }
        let line = &self.lines[idx];
        input_call()
            .find_iter(line)
            .map(|m| m.start())
            .filter(|&pos| {
                self.scans[idx].is_code(pos)
                    && line[..pos].bytes().next_back() != Some(b'.')
                    && !is_definition(line, pos)
                    && !preceded_by_keyword(line, pos, "await")
            })
            .collect()
    }

    /// Positions of calls to `name` on line `idx`. Calls through attribute
    /// access count only when `name` is defined as a method.
    fn call_sites(&self, idx: usize, name: &str) -> Vec<usize> {
        let Some(pattern) = word(name) else {
            return Vec::new();
        };
        let line = &self.lines[idx];
        let dotted_ok = self.methods.contains(name);
        pattern
            .find_iter(line)
            .filter(|m| {
                self.scans[idx].is_code(m.start())
                    && !is_definition(line, m.start())
                    && line[m.end()..].trim_start().starts_with('(')
                    && (dotted_ok || line[..m.start()].trim_end().bytes().next_back() != Some(b'.'))
            })
            .map(|m| m.start())
            .collect()
    }

    /// Where `await` goes for the call at `pos`, if it can be awaited in
    /// place. A receiver that itself contains an awaited call cannot.
    fn await_site(&self, idx: usize, pos: usize, promoted: &[String]) -> Option<usize> {
        let start = primary_start(&self.lines[idx], &self.scans[idx], pos)?;
        let receiver = start..pos;
        let nested = self.input_calls(idx).into_iter().any(|p| receiver.contains(&p))
            || promoted
                .iter()
                .any(|name| self.call_sites(idx, name).into_iter().any(|p| receiver.contains(&p)));
        (!nested).then_some(start)
    }

    fn awaits_on(&self, idx: usize, promoted: &[String]) -> bool {
        !self.sync_only[idx]
            && (!self.input_calls(idx).is_empty()
                || promoted.iter().any(|name| {
                    self.call_sites(idx, name)
                        .into_iter()
                        .any(|pos| self.await_site(idx, pos, promoted).is_some())
                }))
    }

    fn mentions(&self, indices: &[usize], keyword: &Regex) -> bool {
        indices.iter().any(|&idx| {
            keyword
                .find_iter(&self.lines[idx])
                .any(|m| self.scans[idx].is_code(m.start()))
        })
    }

    /// Every reference to `name` is its definition or a call we can see.
    /// A call inside a string literal may be an f-string field.
    fn only_called(&self, name: &str) -> bool {
        let Some(pattern) = word(name) else {
            return false;
        };
        self.lines.iter().enumerate().all(|(idx, line)| {
            pattern.find_iter(line).all(|m| {
                let called = line[m.end()..].trim_start().starts_with('(');
                if self.scans[idx].is_code(m.start()) {
                    is_definition(line, m.start()) || called
                } else {
                    !called
                }
            })
        })
    }

    fn blocks_named<'s>(&'s self, name: &'s str) -> impl Iterator<Item = usize> + 's {
        self.blocks
            .iter()
            .enumerate()
            .filter(move |(_, block)| block.name == name)
            .map(|(i, _)| i)
    }

    fn promotable(&self, name: &str) -> bool {
        if is_dunder(name) || name == "input" || name == "print" {
            return false;
        }
        self.blocks_named(name).all(|i| {
            let block = &self.blocks[i];
            block.kind == BlockKind::Function { is_async: false }
                && !block.decorated
                && !self.mentions(&self.own_lines(i), yield_keyword())
        }) && self.only_called(name)
    }

    fn all_calls_awaitable(&self, name: &str, promoted: &[String]) -> bool {
        (0..self.lines.len()).all(|idx| {
            self.call_sites(idx, name).into_iter().all(|pos| {
                self.can_await_at(idx, promoted) && self.await_site(idx, pos, promoted).is_some()
            })
        })
    }

    fn plan_promotions(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        for block in &self.blocks {
            if matches!(block.kind, BlockKind::Function { .. }) && !candidates.contains(&block.name) {
                candidates.push(block.name.clone());
            }
        }
        candidates.retain(|name| self.promotable(name));

        let mut excluded: HashSet<String> = HashSet::new();
        loop {
            let mut promoted: Vec<String> = Vec::new();
            loop {
                let next = candidates
                    .iter()
                    .find(|name| {
                        !excluded.contains(*name)
                            && !promoted.contains(*name)
                            && self.blocks_named(name).any(|i| {
                                self.own_lines(i)
                                    .into_iter()
                                    .any(|idx| self.awaits_on(idx, &promoted))
                            })
                    })
                    .cloned();
                match next {
                    Some(name) => promoted.push(name),
                    None => break,
                }
            }

            let stuck: Vec<String> = promoted
                .iter()
                .filter(|name| !self.all_calls_awaitable(name, &promoted))
                .cloned()
                .collect();
            if stuck.is_empty() {
                return promoted;
            }
            for name in stuck {
                log::debug!("'{}' is called where it cannot be awaited; it stays synchronous", name);
                excluded.insert(name);
            }
        }
    }

    /// Text to insert into line `idx`, last position first.
    fn insertions(&self, idx: usize, promoted: &[String]) -> Vec<(usize, String)> {
        let line = &self.lines[idx];
        let mut edits = Vec::new();
        if self.can_await_at(idx, promoted) {
            for pos in self.input_calls(idx) {
                edits.push((pos, format!("await {}.", IO_OBJECT)));
            }
            for name in promoted {
                for pos in self.call_sites(idx, name) {
                    if let Some(start) = self.await_site(idx, pos, promoted) {
                        if !preceded_by_keyword(line, start, "await") {
                            edits.push((start, "await ".to_string()));
                        }
                    }
                }
            }
        }
        let promotes_header = self.blocks.iter().any(|block| {
            block.line == idx
                && block.kind == BlockKind::Function { is_async: false }
                && promoted.contains(&block.name)
        });
        if promotes_header {
            edits.push((indentation_width_bytes(line), "async ".to_string()));
        }
        edits.sort_by(|a, b| b.0.cmp(&a.0));
        edits.dedup_by_key(|edit| edit.0);
        edits
    }
}
