use regex::{Captures, Regex, RegexBuilder};

pub const DEFAULT_SNIPPET_CHARS: usize = 200;

fn term_pattern(terms: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| regex::escape(t))
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    let pattern = format!(r"\b(?:{})\b", alternatives.join("|"));
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}

/// Wrap whole-word, case-insensitive matches of any term in `<em>` tags.
pub fn highlight(text: &str, terms: &[String]) -> String {
    match term_pattern(terms) {
        Some(re) => re.replace_all(text, |caps: &Captures| format!("<em>{}</em>", &caps[0])).into_owned(),
        None => text.to_string(),
    }
}

/// True when any term occurs in `text` as a whole word.
pub fn matches_any(text: &str, terms: &[String]) -> bool {
    term_pattern(terms).is_some_and(|re| re.is_match(text))
}

/// A highlighted window of roughly `window` chars around the first term match, or the
/// leading `window` chars when nothing matches. Returns `None` for empty text.
pub fn snippet(text: &str, terms: &[String], window: usize) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let first = term_pattern(terms).and_then(|re| re.find(text).map(|m| m.start()));
    let raw = match first {
        Some(idx) => &text[chars_back(text, idx, window / 2)..chars_forward(text, idx, window)],
        None => &text[..chars_forward(text, 0, window)],
    };
    Some(highlight(raw, terms))
}

/// Byte offset `n` chars before `idx`, clamped to the start.
fn chars_back(text: &str, idx: usize, n: usize) -> usize {
    if n == 0 {
        return idx;
    }
    text[..idx].char_indices().rev().nth(n - 1).map(|(i, _)| i).unwrap_or(0)
}

/// Byte offset `n` chars after `idx`, clamped to the end.
fn chars_forward(text: &str, idx: usize, n: usize) -> usize {
    text[idx..].char_indices().nth(n).map(|(i, _)| idx + i).unwrap_or(text.len())
}
