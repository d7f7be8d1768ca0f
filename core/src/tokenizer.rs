use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z0-9_]+").expect("valid regex");
}

/// Tokenize text into lowercase ASCII word terms, dropping single-character tokens.
///
/// Anything outside `[a-z0-9_]` after lowercasing acts as a separator. Duplicates are
/// kept in order; no stemming or stopword filtering is applied.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}
