use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const DELIMITER: &str = ":";

pub mod prefix {
    pub const SEARCH: &str = "search";
    pub const PAPER: &str = "paper";
    pub const ARTICLE: &str = "article";
    pub const STATS: &str = "stats";
    pub const AUTOCOMPLETE: &str = "autocomplete";
}

/// Join `prefix` and the present parts with `:`. Absent parts are skipped entirely.
pub fn generate_key(prefix: &str, parts: &[Option<&str>]) -> String {
    let mut key = String::from(prefix);
    for part in parts.iter().flatten() {
        key.push_str(DELIMITER);
        key.push_str(part);
    }
    key
}

/// Query text is embedded base64-encoded so delimiters and globs inside it stay inert.
pub fn encode_query(query: &str) -> String { STANDARD.encode(query.as_bytes()) }
