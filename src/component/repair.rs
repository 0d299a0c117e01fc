use std::sync::LazyLock;

use regex::Regex;

use crate::component::scan::Scanner;
use crate::component::validate;

/// A tag cut off before its `>`, matched from its `<` to the end of input.
static DANGLING_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^</?(?:[A-Za-z][\w.:-]*(?:\s[^<>]*)?)?$").expect("dangling tag pattern is valid")
});

static CLOSE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^</([A-Za-z][\w.:-]*)?\s*>").expect("close tag pattern is valid")
});

static SELF_CLOSING_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<[A-Za-z][\w.:-]*(?:\s[^<>]*)?/>").expect("self-closing pattern is valid")
});

/// Named open tag, or `<>` for a fragment (captured name absent).
static OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<(?:([A-Za-z][\w.:-]*)(?:\s[^<>]*)?)?>").expect("open tag pattern is valid")
});

/// Best-effort completion of component source cut off mid-stream.
///
/// Drops a dangling partial tag at the end, then appends one close tag per
/// still-open element (innermost first), the missing `)` and the missing
/// `}`, in that order. Input that is already balanced comes back unchanged.
pub fn repair(src: &str) -> String {
    let src = strip_dangling_tag(src);

    let mut stack: Vec<String> = Vec::new();
    let mut braces: i64 = 0;
    let mut parens: i64 = 0;

    for (i, c) in Scanner::new(src) {
        match c {
            '{' => braces += 1,
            '}' => braces -= 1,
            '(' => parens += 1,
            ')' => parens -= 1,
            '<' => track_tag(&src[i..], &mut stack),
            _ => {}
        }
    }

    let mut out = src.to_string();
    for name in stack.iter().rev() {
        out.push_str("</");
        out.push_str(name);
        out.push('>');
    }
    for _ in 0..parens.max(0) {
        out.push(')');
    }
    for _ in 0..braces.max(0) {
        out.push('}');
    }

    if out.len() != src.len() {
        tracing::debug!(
            unclosed_tags = stack.len(),
            parens = parens.max(0),
            braces = braces.max(0),
            "repaired truncated component"
        );
    }
    out
}

/// Drop a tag that never reached its `>`. Only the last `<` in code position
/// qualifies, and only where markup can start; `v<max` is a comparison.
/// Source that already validates is never touched.
fn strip_dangling_tag(src: &str) -> &str {
    if validate(src).is_ok() {
        return src;
    }
    let last_lt = Scanner::new(src)
        .filter(|(_, c)| *c == '<')
        .map(|(i, _)| i)
        .last();
    match last_lt {
        Some(start) if DANGLING_TAG.is_match(&src[start..]) && markup_can_start(&src[..start]) => {
            &src[..start]
        }
        _ => src,
    }
}

fn markup_can_start(before: &str) -> bool {
    let before = before.trim_end();
    if before.is_empty() || before.ends_with(['(', '>', '{', '}', ',', '?', ':', '=', '&', '|']) {
        return true;
    }
    before
        .strip_suffix("return")
        .is_some_and(|rest| !rest.ends_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$'))
}

fn track_tag(at: &str, stack: &mut Vec<String>) {
    if let Some(caps) = CLOSE_TAG.captures(at) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        // Pop to the matching entry; a stray close tag is ignored.
        if let Some(pos) = stack.iter().rposition(|open| open == name) {
            stack.truncate(pos);
        }
    } else if SELF_CLOSING_TAG.is_match(at) {
        // Nothing to close.
    } else if let Some(caps) = OPEN_TAG.captures(at) {
        let name = caps.get(1).map_or("", |m| m.as_str());
        stack.push(name.to_string());
    }
}
