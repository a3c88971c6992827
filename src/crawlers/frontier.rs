use std::collections::{HashSet, VecDeque};

/// Pending and dispatched URLs of one crawl run.
///
/// A URL is marked seen when it is dequeued, and is never queued again once
/// seen or while already queued, so each URL is dispatched at most once.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    seen: HashSet<String>,
}

impl Frontier {
    pub fn with_seed(seed: &str) -> Self {
        let mut frontier = Self::default();
        frontier.enqueue(seed.to_string());
        frontier
    }

    /// Queue a normalized URL. Returns false if it was seen or already queued.
    pub fn enqueue(&mut self, url: String) -> bool {
        if self.seen.contains(&url) || self.queued.contains(&url) {
            return false;
        }
        self.queued.insert(url.clone());
        self.queue.push_back(url);
        true
    }

    /// Take the next URL and mark it seen in the same step
    pub fn dequeue(&mut self) -> Option<String> {
        let url = self.queue.pop_front()?;
        self.queued.remove(&url);
        self.seen.insert(url.clone());
        Some(url)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_queued_not_seen() {
        let frontier = Frontier::with_seed("https://ex.com/");
        assert_eq!(frontier.pending(), 1);
        assert_eq!(frontier.seen_count(), 0);
    }

    #[test]
    fn test_dequeue_marks_seen() {
        let mut frontier = Frontier::with_seed("https://ex.com/");
        assert_eq!(frontier.dequeue().as_deref(), Some("https://ex.com/"));
        assert_eq!(frontier.seen_count(), 1);
        assert!(frontier.is_empty());
        assert!(frontier.dequeue().is_none());
    }

    #[test]
    fn test_seen_and_queued_urls_are_not_requeued() {
        let mut frontier = Frontier::with_seed("https://ex.com/");
        assert!(!frontier.enqueue("https://ex.com/".to_string()));
        assert!(frontier.enqueue("https://ex.com/a".to_string()));
        assert!(!frontier.enqueue("https://ex.com/a".to_string()));

        frontier.dequeue();
        assert!(!frontier.enqueue("https://ex.com/".to_string()));
        assert_eq!(frontier.pending(), 1);
    }

    #[test]
    fn test_dispatch_order_is_fifo() {
        let mut frontier = Frontier::with_seed("s");
        frontier.enqueue("a".to_string());
        frontier.enqueue("b".to_string());
        let order: Vec<String> = std::iter::from_fn(|| frontier.dequeue()).collect();
        assert_eq!(order, vec!["s", "a", "b"]);
    }
}
