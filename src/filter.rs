use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for URL filtering in the crawler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlFilterConfig {
    /// Only follow links below this path (if None, the whole origin is in scope)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_path_prefix: Option<String>,

    /// Regex patterns for URLs to include (if empty, all URLs are included unless excluded)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Regex patterns for URLs to exclude (these take precedence over include patterns)
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Decides which discovered links belong to a crawl and turns them into frontier keys.
///
/// Containment compares scheme, host and port with the seed, so
/// `https://example.com2/` is never in scope for a seed on `https://example.com`.
#[derive(Debug)]
pub struct UrlFilter {
    seed: Url,
    config: UrlFilterConfig,
    include_regexes: Vec<Regex>,
    exclude_regexes: Vec<Regex>,
}

impl UrlFilter {
    /// Create a new URL filter for a seed from configuration
    pub fn new(seed: &Url, config: UrlFilterConfig) -> Result<Self, regex::Error> {
        // Compile regex patterns
        let mut include_regexes = Vec::with_capacity(config.include_patterns.len());
        for pattern in &config.include_patterns {
            include_regexes.push(Regex::new(pattern)?);
        }

        let mut exclude_regexes = Vec::with_capacity(config.exclude_patterns.len());
        for pattern in &config.exclude_patterns {
            exclude_regexes.push(Regex::new(pattern)?);
        }

        Ok(Self {
            seed: normalize_url(seed),
            config,
            include_regexes,
            exclude_regexes,
        })
    }

    /// Parse, normalize and filter a raw link. Returns the frontier key when
    /// the link is in scope, None when it is unparseable or out of scope.
    pub fn accept(&self, raw: &str) -> Option<String> {
        let resolved = match self.seed.join(raw.trim()) {
            Ok(url) => url,
            Err(e) => {
                ::log::debug!("Skipping unparseable link {}: {}", raw, e);
                return None;
            }
        };
        let normalized = normalize_url(&resolved);
        if !self.should_crawl(&normalized) {
            ::log::trace!("URL filter rejected: {}", normalized);
            return None;
        }
        Some(normalized.to_string())
    }

    /// Determine if a URL should be crawled based on all filtering rules
    pub fn should_crawl(&self, url: &Url) -> bool {
        if !self.is_same_origin(url) {
            return false;
        }

        if !self.is_in_path_scope(url) {
            return false;
        }

        // Check regex exclusions (these take precedence)
        let url_str = url.as_str();
        if self.exclude_regexes.iter().any(|regex| regex.is_match(url_str)) {
            return false;
        }

        // If include patterns are specified, at least one must match
        if !self.include_regexes.is_empty()
            && !self.include_regexes.iter().any(|regex| regex.is_match(url_str))
        {
            return false;
        }

        true
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && url.origin() == self.seed.origin()
    }

    /// Check if a URL is within the required path scope
    fn is_in_path_scope(&self, url: &Url) -> bool {
        if let Some(prefix) = &self.config.required_path_prefix {
            url.path().starts_with(prefix)
        } else {
            true // No path restriction
        }
    }
}

/// Strip fragment and query so that `/page#a` and `/page?x=1` share the key `/page`
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.set_query(None);
    normalized
}

/// Parse and normalize a seed or user-supplied URL
pub fn parse_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(normalize_url(&url)),
        other => Err(format!("unsupported scheme '{}'", other)),
    }
}
