//! Model Output Recovery
//!
//! Free-tier models return JSON that is only approximately well formed: it is
//! wrapped in prose or markdown fences, prefixed with reasoning, carries
//! invalid escapes or raw newlines inside strings, has trailing commas, or is
//! cut off mid-document. [`recover`] runs an ordered cascade of increasingly
//! aggressive repairs and stops at the first one that parses.
//!
//! Cascade:
//! 1. strip `<think>` reasoning sections
//! 2. parse as-is
//! 3. parse the first fenced code block
//! 4. parse the span from the first `{` to the last `}`
//! 5. escape repair ([`EscapeScanner`]), parse
//! 6. drop trailing commas and `//` comments, escape repair, parse
//! 7. close a truncated document, parse
//! 8. give back the cleaned text
//!
//! [`extract_keyed_object`] is a separate last resort that pulls one
//! well-formed object (the file map) out of an otherwise broken document.

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const FENCE: &str = "```";

/// Upper bound on how often truncation recovery retreats to an earlier
/// member boundary before giving up.
const MAX_TRUNCATION_RETREATS: usize = 8;

/// Outcome of [`recover`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recovered {
    /// Some stage produced a parseable document.
    Value(Value),
    /// Every stage failed; carries the cleaned text for the caller.
    Raw(String),
}

impl Recovered {
    /// The parsed value, if any stage succeeded.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Recovered::Value(value) => Some(value),
            Recovered::Raw(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Recovered::Value(value) => Some(value),
            Recovered::Raw(_) => None,
        }
    }

    /// The parsed value, or [`CoreError::Unrecoverable`] with a preview of
    /// the cleaned text.
    pub fn into_result(self) -> CoreResult<Value> {
        match self {
            Recovered::Value(value) => Ok(value),
            Recovered::Raw(text) => Err(CoreError::unrecoverable(&text)),
        }
    }
}

/// Coerce raw model output into a JSON value. Never fails.
pub fn recover(raw: &str) -> Recovered {
    let mut cleaned = strip_reasoning(raw).trim().to_string();
    if let Some(value) = parse(&cleaned) {
        return Recovered::Value(value);
    }

    if let Some(block) = extract_fenced_block(&cleaned) {
        cleaned = block.trim().to_string();
        if let Some(value) = parse(&cleaned) {
            return Recovered::Value(value);
        }
    }

    // Everything from an opening bracket on. Truncated output has no final
    // closer, so the bracket slice below would cut its tail off.
    let tails = truncation_tails(&cleaned);

    if let Some(span) = slice_outer_brackets(&cleaned) {
        cleaned = span.to_string();
        if let Some(value) = parse(&cleaned) {
            return Recovered::Value(value);
        }
    }

    if let Some(value) = parse(&repair_escapes(&cleaned)) {
        return Recovered::Value(value);
    }

    let relaxed = strip_trailing_commas_and_comments(&cleaned);
    if let Some(value) = parse(&repair_escapes(&relaxed)) {
        return Recovered::Value(value);
    }

    let unbalanced: Vec<&String> = tails.iter().filter(|t| !is_balanced(t)).collect();
    if unbalanced.is_empty() {
        if let Some(value) = recover_truncated(&cleaned) {
            return Recovered::Value(value);
        }
    }
    for tail in unbalanced {
        if let Some(value) = recover_truncated(tail) {
            return Recovered::Value(value);
        }
    }

    Recovered::Raw(cleaned)
}

fn parse(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Remove `<think>...</think>` sections emitted by reasoning models.
///
/// An orphan closing tag (opening tag swallowed upstream) drops everything
/// before it. An unterminated opening tag is left in place.
pub fn strip_reasoning(text: &str) -> String {
    let mut rest = text;
    if let Some(close) = rest.find(THINK_CLOSE) {
        if !rest[..close].contains(THINK_OPEN) {
            rest = &rest[close + THINK_CLOSE.len()..];
        }
    }

    let mut out = String::with_capacity(rest.len());
    loop {
        let Some(open) = rest.find(THINK_OPEN) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..open]);
        match rest[open..].find(THINK_CLOSE) {
            Some(close) => rest = &rest[open + close + THINK_CLOSE.len()..],
            None => {
                out.push_str(&rest[open..]);
                break;
            }
        }
    }
    out
}

/// Content of the first fenced code block. An unterminated fence (truncated
/// output) yields everything after the opening fence line.
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find(FENCE)?;
    let after = &text[start + FENCE.len()..];

    let line_end = after.find('\n').unwrap_or(after.len());
    let tag = after[..line_end].trim();
    let is_language_tag = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '_' | '.'));
    let body = if is_language_tag {
        after.get(line_end + 1..).unwrap_or("")
    } else {
        after
    };

    match body.find(FENCE) {
        Some(end) => Some(&body[..end]),
        None => Some(body),
    }
}

/// Strip markdown fences around a single source file.
///
/// Models asked for "raw code only" still wrap it in a fence now and then,
/// sometimes with a sentence of prose before or after.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains(FENCE) {
        return trimmed.to_string();
    }
    match extract_fenced_block(trimmed) {
        Some(block) if !block.trim().is_empty() => block.trim_end().to_string(),
        _ => trimmed.replace(FENCE, "").trim().to_string(),
    }
}

fn closer_for(opener: char) -> char {
    if opener == '[' {
        ']'
    } else {
        '}'
    }
}

fn span_from(text: &str, start: usize, opener: char) -> Option<&str> {
    let last = text.rfind(closer_for(opener))?;
    (last > start).then(|| &text[start..=last])
}

/// Slice from the first opening bracket to the last matching closer.
///
/// When the first opener's span does not parse (prose like `[1]` ahead of
/// an object), the other bracket kind wins if its span parses or is wider.
/// No slice is taken when the first opener is never closed.
fn slice_outer_brackets(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let opener = text[start..].chars().next()?;
    let primary = span_from(text, start, opener)?;
    if parse(primary).is_some() {
        return Some(primary);
    }

    let other = if opener == '{' { '[' } else { '{' };
    let alternate = text
        .find(other)
        .and_then(|at| span_from(text, at, other))
        .filter(|alt| alt.len() > primary.len() || parse(alt).is_some());
    Some(alternate.unwrap_or(primary))
}

/// Candidate truncated documents: the text from the first `{` and from the
/// first `[`, earliest first.
fn truncation_tails(text: &str) -> Vec<String> {
    let mut starts: Vec<usize> = ['{', '['].iter().filter_map(|c| text.find(*c)).collect();
    starts.sort_unstable();
    starts
        .into_iter()
        .map(|start| text[start..].trim_end().to_string())
        .collect()
}

// ============================================================================
// Escape repair
// ============================================================================

/// State of the escape-repair scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    /// Between tokens, outside any string literal.
    Outside,
    /// Inside a string literal.
    InString,
    /// A backslash was seen inside a string literal.
    InEscape,
    /// `\u` was seen; holds the hex digits collected so far.
    InUnicode(String),
}

/// Character-at-a-time scanner that rewrites string literals into valid JSON.
///
/// Inside strings: valid escapes pass through, an unrecognized escape gets its
/// backslash doubled, raw control characters are escaped. Text outside strings
/// is copied unchanged.
#[derive(Debug)]
pub struct EscapeScanner {
    state: ScanState,
    out: String,
}

impl Default for EscapeScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl EscapeScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Outside,
            out: String::new(),
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn feed(&mut self, ch: char) {
        match std::mem::replace(&mut self.state, ScanState::Outside) {
            ScanState::Outside => {
                self.out.push(ch);
                if ch == '"' {
                    self.state = ScanState::InString;
                }
            }
            ScanState::InString => self.string_char(ch),
            ScanState::InEscape => match ch {
                '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => {
                    self.out.push('\\');
                    self.out.push(ch);
                    self.state = ScanState::InString;
                }
                'u' => self.state = ScanState::InUnicode(String::new()),
                _ => {
                    self.out.push_str("\\\\");
                    self.string_char(ch);
                }
            },
            ScanState::InUnicode(mut digits) => {
                if ch.is_ascii_hexdigit() {
                    digits.push(ch);
                    if digits.len() == 4 {
                        self.out.push_str("\\u");
                        self.out.push_str(&digits);
                        self.state = ScanState::InString;
                    } else {
                        self.state = ScanState::InUnicode(digits);
                    }
                } else {
                    self.out.push_str("\\\\u");
                    self.out.push_str(&digits);
                    self.string_char(ch);
                }
            }
        }
    }

    fn string_char(&mut self, ch: char) {
        self.state = ScanState::InString;
        match ch {
            '\\' => self.state = ScanState::InEscape,
            '"' => {
                self.out.push('"');
                self.state = ScanState::Outside;
            }
            '\n' => self.out.push_str("\\n"),
            '\r' => self.out.push_str("\\r"),
            '\t' => self.out.push_str("\\t"),
            c if (c as u32) < 0x20 => self.out.push_str(&format!("\\u{:04x}", c as u32)),
            c => self.out.push(c),
        }
    }

    /// Flush pending state and return the repaired text. A dangling backslash
    /// at the very end is dropped.
    pub fn finish(mut self) -> String {
        if let ScanState::InUnicode(digits) = &self.state {
            let pending = format!("\\\\u{}", digits);
            self.out.push_str(&pending);
        }
        self.out
    }
}

/// Run the escape-repair scanner over `text`.
pub fn repair_escapes(text: &str) -> String {
    let mut scanner = EscapeScanner::new();
    for ch in text.chars() {
        scanner.feed(ch);
    }
    scanner.finish()
}

// ============================================================================
// Relaxed syntax
// ============================================================================

/// Remove `//` line comments and commas directly before `}` or `]`, both only
/// outside string literals.
pub fn strip_trailing_commas_and_comments(text: &str) -> String {
    strip_trailing_commas(&strip_line_comments(text))
}

fn strip_line_comments(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if ch == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
        i += 1;
    }
    out
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

// ============================================================================
// Truncation recovery
// ============================================================================

/// Bracket structure of a (possibly truncated) document.
struct Structure {
    /// Unclosed `{` / `[` in nesting order.
    open: Vec<char>,
    /// The text ends inside a string literal.
    in_string: bool,
    /// Byte offset of the last place a member can be cut off: a comma, or
    /// just after an opening bracket.
    boundary: Option<usize>,
}

fn scan_structure(text: &str) -> Structure {
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut boundary = None;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => {
                open.push(ch);
                boundary = Some(i + 1);
            }
            '}' | ']' => {
                open.pop();
            }
            ',' => boundary = Some(i),
            _ => {}
        }
    }

    Structure {
        open,
        in_string,
        boundary,
    }
}

fn is_balanced(text: &str) -> bool {
    let structure = scan_structure(text);
    structure.open.is_empty() && !structure.in_string
}

/// Append whatever a truncated document is missing: a closing quote, a value
/// for a dangling key, and one closer per unmatched bracket.
fn close_truncated(text: &str) -> String {
    let structure = scan_structure(text);
    let mut out = text.trim_end().to_string();

    if structure.in_string {
        out.push('"');
    } else {
        while out.ends_with(',') {
            out.pop();
            out.truncate(out.trim_end().len());
        }
        if out.ends_with(':') {
            out.push_str("null");
        }
    }

    for opener in structure.open.iter().rev() {
        out.push(if *opener == '{' { '}' } else { ']' });
    }
    out
}

/// Close a document that was cut off mid-stream.
///
/// If closing it as-is does not parse (for example the cut fell inside an
/// object key), retreat to the previous member boundary and try again.
pub fn recover_truncated(text: &str) -> Option<Value> {
    let repaired = repair_escapes(&strip_trailing_commas_and_comments(text));
    let mut candidate = repaired.trim_end();

    for _ in 0..=MAX_TRUNCATION_RETREATS {
        if let Some(value) = parse(&close_truncated(candidate)) {
            return Some(value);
        }
        match scan_structure(candidate).boundary {
            Some(cut) if cut < candidate.len() => candidate = candidate[..cut].trim_end(),
            _ => break,
        }
    }
    None
}

// ============================================================================
// Keyed extraction
// ============================================================================

/// Locate `"<key>": { ... }` anywhere in `raw` and parse just that object.
///
/// Works when the surrounding document is beyond repair but the keyed
/// object itself is balanced. Returns only non-empty objects.
pub fn extract_keyed_object(raw: &str, key: &str) -> Option<Value> {
    let needle = format!("\"{}\"", key);

    for (key_pos, _) in raw.match_indices(&needle) {
        let after_key = key_pos + needle.len();
        let Some(colon_rel) = raw[after_key..].find(':') else {
            continue;
        };
        let colon = after_key + colon_rel;
        if !raw[after_key..colon].trim().is_empty() {
            continue;
        }
        let Some(brace_rel) = raw[colon + 1..].find('{') else {
            continue;
        };
        let brace = colon + 1 + brace_rel;
        if !raw[colon + 1..brace].trim().is_empty() {
            continue;
        }
        let Some(len) = matching_brace(&raw[brace..]) else {
            continue;
        };

        let span = &raw[brace..brace + len];
        if let Some(value) = parse(&repair_escapes(span)) {
            if value.as_object().is_some_and(|map| !map.is_empty()) {
                return Some(value);
            }
        }
    }
    None
}

/// Byte length of the balanced `{...}` starting at the beginning of `text`.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
