//! Polite, bounded-concurrency same-origin crawler with a periodic site
//! monitor and a browser-compatibility checker, all driving a headless
//! browser over WebDriver.

// Re-export modules
pub mod browser;
pub mod checks;
pub mod config;
pub mod crawlers;
pub mod error;
pub mod filter;
pub mod inspector;
pub mod parsers;
pub mod results;
pub mod server;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use browser::{Browser, BrowserLauncher, Page, WebDriverLauncher};
pub use checks::{CompatibilityChecker, SiteMonitor};
pub use config::AppConfig;
pub use crawlers::{CrawlEngine, CrawlRun, ScheduledCrawl};
pub use error::{BrowserError, CheckError, ConfigError, CrawlError, StorageError};
pub use results::{CrawlSummary, LinkEdge, PageResult, StopReason};
pub use store::{ResultStore, SqliteStore};
pub use supervisor::{Exit, Supervisor};
