//! Code-block extraction from accumulating assistant text.
//!
//! Two grammars that never overlap: `<ui_preview>` blocks inside
//! conversational replies, and a whole-buffer markdown fence around raw code
//! from sandbox generation.

pub const PREVIEW_OPEN: &str = "<ui_preview>";
pub const PREVIEW_CLOSE: &str = "</ui_preview>";

const FENCE: &str = "```";

/// Every complete preview block, trimmed, in document order. An unterminated
/// trailing block is not included.
pub fn extract_all(text: &str) -> Vec<String> {
    complete_blocks(text).map(|b| b.trim().to_string()).collect()
}

/// The last complete preview block.
pub fn latest(text: &str) -> Option<String> {
    complete_blocks(text).last().map(|b| b.trim().to_string())
}

/// Whether at least one fully closed block exists. Checked after every delta.
pub fn is_complete(text: &str) -> bool {
    complete_blocks(text).next().is_some()
}

/// Body of a trailing block that has been opened but not yet closed.
pub fn pending(text: &str) -> Option<&str> {
    let mut rest = text;
    loop {
        let open = rest.find(PREVIEW_OPEN)?;
        let body = &rest[open + PREVIEW_OPEN.len()..];
        match body.find(PREVIEW_CLOSE) {
            Some(close) => rest = &body[close + PREVIEW_CLOSE.len()..],
            None => return Some(body),
        }
    }
}

fn complete_blocks(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let open = rest.find(PREVIEW_OPEN)?;
        let body = &rest[open + PREVIEW_OPEN.len()..];
        let close = body.find(PREVIEW_CLOSE)?;
        rest = &body[close + PREVIEW_CLOSE.len()..];
        Some(&body[..close])
    })
}

/// A piece of an assistant message, for rendering prose and previews apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// A closed block; `index` counts complete blocks from zero.
    Preview { index: usize, code: &'a str },
    /// An open block still streaming.
    PendingPreview(&'a str),
}

/// Split `text` into prose and preview segments in order. Empty prose
/// between blocks is dropped.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = text;
    let mut index = 0;

    while let Some(open) = rest.find(PREVIEW_OPEN) {
        push_text(&mut out, &rest[..open]);
        let body = &rest[open + PREVIEW_OPEN.len()..];
        match body.find(PREVIEW_CLOSE) {
            Some(close) => {
                out.push(Segment::Preview {
                    index,
                    code: body[..close].trim(),
                });
                index += 1;
                rest = &body[close + PREVIEW_CLOSE.len()..];
            }
            None => {
                out.push(Segment::PendingPreview(body.trim_start()));
                return out;
            }
        }
    }
    push_text(&mut out, rest);
    out
}

fn push_text<'a>(out: &mut Vec<Segment<'a>>, text: &'a str) {
    if !text.trim().is_empty() {
        out.push(Segment::Text(text));
    }
}

/// Strip a markdown fence that wraps the entire trimmed buffer.
///
/// The opening fence line may carry a language tag; the closing fence must
/// be the last line. Fences inside the content are left alone, and input
/// that is not wrapped is returned unchanged.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix(FENCE) else {
        return text.to_string();
    };
    // Language tag runs to the end of the first line.
    let Some(newline) = after_open.find('\n') else {
        return text.to_string();
    };
    let tag = after_open[..newline].trim();
    if tag.contains(char::is_whitespace) || tag.contains('`') {
        return text.to_string();
    }
    let body = &after_open[newline + 1..];
    let Some(inner) = body.strip_suffix(FENCE) else {
        return text.to_string();
    };
    // The closing fence must sit on its own line.
    match inner.strip_suffix('\n') {
        Some(code) => code.strip_suffix('\r').unwrap_or(code).to_string(),
        None if inner.is_empty() => String::new(),
        None => text.to_string(),
    }
}

/// Drop the opening fence line of output that was cut off before its
/// closing fence. Anything else is returned unchanged.
pub fn strip_unclosed_fence(text: &str) -> &str {
    let trimmed = text.trim_start();
    let Some(after_open) = trimmed.strip_prefix(FENCE) else {
        return text;
    };
    let Some(newline) = after_open.find('\n') else {
        return text;
    };
    let body = &after_open[newline + 1..];
    if body.contains(FENCE) {
        return text;
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unclosed_fence_line_is_dropped_for_truncated_output() {
        assert_eq!(
            strip_unclosed_fence("```jsx\nfunction App(){return (<div>"),
            "function App(){return (<div>"
        );
        let closed = "```jsx\nx\n```";
        assert_eq!(strip_unclosed_fence(closed), closed);
        assert_eq!(strip_unclosed_fence("plain"), "plain");
    }

    const THREE_OPTIONS: &str = "Here are three directions.\n\
        Option A:\n<ui_preview>\nfunction App(){return <div>A</div>;}\n</ui_preview>\n\
        Option B:\n<ui_preview> function App(){return <div>B</div>;} </ui_preview>\n\
        Option C:\n<ui_preview>function App(){return <div>C</div>;}</ui_preview>\nWhich one?";

    #[test]
    fn extract_all_returns_each_block_trimmed_in_order() {
        let blocks = extract_all(THREE_OPTIONS);
        assert_eq!(
            blocks,
            vec![
                "function App(){return <div>A</div>;}",
                "function App(){return <div>B</div>;}",
                "function App(){return <div>C</div>;}",
            ]
        );
        assert_eq!(latest(THREE_OPTIONS).unwrap(), blocks[2]);
    }

    #[test]
    fn unterminated_final_block_is_excluded() {
        let text = "<ui_preview>one</ui_preview> text <ui_preview>two</ui_prev";
        assert_eq!(extract_all(text), vec!["one"]);
        assert_eq!(pending(text), Some("two</ui_prev"));
    }

    #[test]
    fn is_complete_flips_only_on_exact_close_tag() {
        let mut text = String::from("Sure! <ui_preview>function App(){}");
        assert!(!is_complete(&text));
        for ch in PREVIEW_CLOSE.chars() {
            assert!(!is_complete(&text), "complete too early at {text:?}");
            text.push(ch);
        }
        assert!(is_complete(&text));
    }

    #[test]
    fn no_blocks_means_nothing() {
        assert!(extract_all("plain prose").is_empty());
        assert_eq!(latest("plain prose"), None);
        assert_eq!(pending("plain prose"), None);
        assert_eq!(pending("<ui_preview>a</ui_preview>"), None);
    }

    #[test]
    fn segments_address_each_block() {
        let segs = segments(THREE_OPTIONS);
        let previews: Vec<usize> = segs
            .iter()
            .filter_map(|s| match s {
                Segment::Preview { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(previews, vec![0, 1, 2]);
        assert!(matches!(segs.first(), Some(Segment::Text(t)) if t.starts_with("Here are")));
        assert!(matches!(segs.last(), Some(Segment::Text(t)) if t.contains("Which one?")));
    }

    #[test]
    fn segments_end_with_pending_block_while_streaming() {
        let segs = segments("Intro <ui_preview>\nfunction App(){ret");
        assert_eq!(
            segs,
            vec![
                Segment::Text("Intro "),
                Segment::PendingPreview("function App(){ret"),
            ]
        );
    }

    #[test]
    fn strips_fence_with_language_tag_once() {
        let input = "```jsx\nfunction App(){return null;}\n```";
        let out = strip_code_fences(input);
        assert_eq!(out, "function App(){return null;}");
        assert!(!out.contains('`'));
    }

    #[test]
    fn strips_fence_without_tag_and_surrounding_whitespace() {
        assert_eq!(strip_code_fences("\n```\nconst a = 1;\n```\n  "), "const a = 1;");
    }

    #[test]
    fn unfenced_input_is_unchanged() {
        let input = "function App(){return null;}";
        assert_eq!(strip_code_fences(input), input);
    }

    #[test]
    fn embedded_fences_are_left_alone() {
        let input = "Here you go:\n```jsx\nfunction App(){}\n```\nEnjoy";
        assert_eq!(strip_code_fences(input), input);

        let wrapped = "```md\nText\n```js\ninner\n```\n```";
        assert_eq!(strip_code_fences(wrapped), "Text\n```js\ninner\n```");
    }

    #[test]
    fn missing_closing_fence_is_unchanged() {
        let input = "```jsx\nfunction App(){";
        assert_eq!(strip_code_fences(input), input);
    }
}
