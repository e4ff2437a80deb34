//! Markdown helpers for the prompts sent to the language model.

/// Escapes text placed inside `[...]` so titles cannot close the link early.
pub(crate) fn escape_link_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '[' | ']' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Collapses every whitespace run (newlines included) to one space, so
/// user text and snippets stay on a single heading or list line.
pub(crate) fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
