use std::time::Duration;

/// Request defaults that would otherwise be scattered through the handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub papers_limit: usize,
    pub articles_limit: usize,
    pub search_limit: usize,
    pub autocomplete_limit: usize,
    pub max_limit: usize,
    pub snippet_chars: usize,
    pub cache_ttl: Duration,
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            papers_limit: 4,
            articles_limit: 5,
            search_limit: 10,
            autocomplete_limit: 5,
            max_limit: 100,
            snippet_chars: scholar_core::highlight::DEFAULT_SNIPPET_CHARS,
            cache_ttl: scholar_core::cache::DEFAULT_TTL,
            admin_token: None,
        }
    }
}

impl ServerConfig {
    /// Fill in settings that come from the environment rather than flags.
    pub fn with_env(mut self) -> Self {
        self.admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
        self
    }

    pub fn clamp_limit(&self, requested: Option<usize>, default: usize) -> usize {
        requested.unwrap_or(default).clamp(1, self.max_limit)
    }
}
