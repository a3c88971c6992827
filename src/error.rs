use std::time::Duration;
use thiserror::Error;

/// Failures raised while driving a browser or one of its pages.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("browser is closed")]
    Closed,

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Failed to get response from page: {0}")]
    NoResponse(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("webdriver command failed: {0}")]
    Command(String),

    #[error("unexpected script payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<fantoccini::error::CmdError> for BrowserError {
    fn from(e: fantoccini::error::CmdError) -> Self {
        BrowserError::Command(e.to_string())
    }
}

/// Failures of the durable result store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors that abort a crawl run. Per-page failures never show up here.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Start URL is required")]
    MissingUrl,

    #[error("Invalid start URL: {0}")]
    InvalidUrl(String),

    #[error("invalid URL pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    BrowserLaunch(#[from] BrowserError),

    #[error("crawl task aborted: {0}")]
    Aborted(String),
}

/// Errors raised while starting a periodic checker.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{name}: {source}")]
    Launch {
        name: String,
        #[source]
        source: BrowserError,
    },

    #[error("{name}: initial check failed: {reason}")]
    InitialCheck { name: String, reason: String },
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// A supervised service failed to come up
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("{name} failed to start: {reason}")]
    Start { name: String, reason: String },
}
