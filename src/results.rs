use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored row per distinct normalized URL that was crawled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// Normalized URL (no query, no fragment)
    pub url: String,

    /// HTTP status of the navigation response, absent on hard failure
    pub status: Option<u16>,

    pub title: String,
    pub description: String,
    pub h1_count: u32,
    pub image_count: u32,
    pub link_count: u32,

    /// Paint timings in milliseconds, 0 when the browser reported none
    pub first_contentful_paint: f64,
    pub largest_contentful_paint: f64,
    pub time_to_interactive: f64,

    /// Rendered document markup at idle time
    pub html: Option<String>,

    /// Set by the store on write
    pub crawled_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
}

/// Directed edge of the link graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEdge {
    pub from_url: String,
    pub to_url: String,
}

impl LinkEdge {
    pub fn new(from_url: &str, to_url: &str) -> Self {
        Self {
            from_url: from_url.to_string(),
            to_url: to_url.to_string(),
        }
    }
}

/// Why the dispatch loop stopped handing out new work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Frontier emptied with nothing in flight
    Exhausted,
    /// `max_pages` URLs were dispatched
    BudgetReached,
    /// External stop request
    Stopped,
    /// Overall wall-clock budget ran out
    DeadlineExceeded,
}

/// Post-run accounting returned by the crawl engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub seed: String,
    pub pages_attempted: usize,
    pub pages_succeeded: usize,
    pub pages_failed: usize,
    pub storage_failures: usize,
    pub edges_recorded: usize,
    pub stop_reason: StopReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlSummary {
    /// True when every page succeeded and every write landed
    pub fn is_complete(&self) -> bool {
        self.pages_failed == 0 && self.storage_failures == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_serializes_camel_case() {
        let page = PageResult {
            url: "https://ex.com/".to_string(),
            first_contentful_paint: 12.5,
            ..PageResult::default()
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["firstContentfulPaint"], 12.5);
        assert!(json.get("h1Count").is_some());
    }
}
