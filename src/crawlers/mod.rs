pub mod frontier;
pub mod scheduled;
pub mod web;

pub use scheduled::ScheduledCrawl;
pub use web::{CrawlEngine, CrawlRun, StopHandle};
