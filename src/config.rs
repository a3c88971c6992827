use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for every hrefbot component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Canonical site URL, the default target for monitoring and compatibility checks
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Periodically crawl `site_url` while the monitor process runs (production mode)
    #[serde(default)]
    pub scheduled_crawl: bool,

    /// Period of the scheduled crawl in seconds
    #[serde(default = "default_interval_secs")]
    pub scheduled_crawl_interval_secs: u64,

    /// SQLite database holding pages, links and reports
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub webdriver: WebDriverConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub compatibility: CompatibilityConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Upper bound on stopping every service when the monitor process exits
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// How to reach the WebDriver server that hosts the headless browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverConfig {
    /// URL for the WebDriver instance
    #[serde(default = "default_webdriver_url")]
    pub url: String,

    /// Endpoints tried in order when `url` refuses the connection
    #[serde(default = "default_fallback_urls")]
    pub fallback_urls: Vec<String>,

    /// Run the browser without a window
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Extra command-line arguments for the browser process
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Settle condition applied after navigation: the page must be complete and
/// its resource count unchanged for `quiet_window_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    #[serde(default = "default_quiet_window_ms")]
    pub quiet_window_ms: u64,

    /// Upper bound on the settle wait; hitting it is not an error
    #[serde(default = "default_idle_max_wait_ms")]
    pub max_wait_ms: u64,
}

/// Configuration for the crawl engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of page visits in flight
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Maximum number of pages dispatched per run
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Pause after each dispatch
    #[serde(default = "default_crawl_delay_ms")]
    pub crawl_delay_ms: u64,

    /// Pause when every concurrency slot is taken
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Optional wall-clock budget for a whole run
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    /// User agent presented by the crawler
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub idle: IdleConfig,

    /// Only follow links below the seed URL's path
    #[serde(default)]
    pub restrict_to_seed_path: bool,

    /// Regex patterns for URLs to include
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Regex patterns for URLs to exclude
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Warning thresholds applied by the site monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorThresholds {
    #[serde(default = "default_max_fcp_ms")]
    pub max_first_contentful_paint_ms: f64,

    #[serde(default = "default_min_h1_count")]
    pub min_h1_count: u32,

    #[serde(default = "default_min_description_len")]
    pub min_description_len: usize,
}

/// Configuration for the site monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// URL to check, defaults to the site URL
    #[serde(default)]
    pub target_url: Option<String>,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Refuse to start when the first check reports an error
    #[serde(default = "default_true")]
    pub fail_on_initial_error: bool,

    #[serde(default)]
    pub thresholds: MonitorThresholds,
}

/// A simulated browser identity used by the compatibility checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIdentity {
    pub name: String,
    pub version: String,
    pub user_agent: String,
}

impl BrowserIdentity {
    pub fn new(name: &str, version: &str, user_agent: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Key used in reports, e.g. "Chrome latest"
    pub fn label(&self) -> String {
        format!("{} {}", self.name, self.version)
    }
}

/// Configuration for the browser compatibility checker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    /// URL to check, defaults to the site URL
    #[serde(default)]
    pub target_url: Option<String>,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_identities")]
    pub identities: Vec<BrowserIdentity>,
}

/// Configuration for the HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_recent_pages_limit")]
    pub recent_pages_limit: usize,

    #[serde(default = "default_links_limit")]
    pub links_limit: usize,

    /// Finished crawl runs kept for `GET /crawl/runs/:run_id`; older ones are evicted
    #[serde(default = "default_finished_runs_kept")]
    pub finished_runs_kept: usize,
}

fn default_finished_runs_kept() -> usize {
    100
}

fn default_site_url() -> String {
    "https://href.lol".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_database_path() -> PathBuf {
    PathBuf::from("crawler.db")
}

/// Default value for webdriver url
fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_fallback_urls() -> Vec<String> {
    vec![
        "http://localhost:9515".to_string(), // ChromeDriver default
        "http://127.0.0.1:4444".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_quiet_window_ms() -> u64 {
    500
}

fn default_idle_max_wait_ms() -> u64 {
    10_000
}

fn default_max_concurrency() -> usize {
    3
}

fn default_max_pages() -> usize {
    1000
}

fn default_crawl_delay_ms() -> u64 {
    1500
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_navigation_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; HrefBot/1.0; +https://href.lol/bot)".to_string()
}

fn default_interval_secs() -> u64 {
    60 * 60
}

fn default_max_fcp_ms() -> f64 {
    2000.0
}

fn default_min_h1_count() -> u32 {
    1
}

fn default_min_description_len() -> usize {
    50
}

fn default_identities() -> Vec<BrowserIdentity> {
    vec![
        BrowserIdentity::new(
            "Chrome",
            "latest",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        ),
        BrowserIdentity::new(
            "Firefox",
            "latest",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
        ),
        BrowserIdentity::new(
            "Safari",
            "latest",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Safari/605.1.15",
        ),
        BrowserIdentity::new(
            "Edge",
            "latest",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
        ),
    ]
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_recent_pages_limit() -> usize {
    100
}

fn default_links_limit() -> usize {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            scheduled_crawl: false,
            scheduled_crawl_interval_secs: default_interval_secs(),
            database_path: default_database_path(),
            webdriver: WebDriverConfig::default(),
            crawler: CrawlerConfig::default(),
            monitor: MonitorConfig::default(),
            compatibility: CompatibilityConfig::default(),
            server: ServerConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            fallback_urls: default_fallback_urls(),
            headless: true,
            extra_args: Vec::new(),
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: default_quiet_window_ms(),
            max_wait_ms: default_idle_max_wait_ms(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_pages: default_max_pages(),
            crawl_delay_ms: default_crawl_delay_ms(),
            backoff_ms: default_backoff_ms(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            max_duration_secs: None,
            user_agent: default_user_agent(),
            idle: IdleConfig::default(),
            restrict_to_seed_path: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            max_first_contentful_paint_ms: default_max_fcp_ms(),
            min_h1_count: default_min_h1_count(),
            min_description_len: default_min_description_len(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            interval_secs: default_interval_secs(),
            fail_on_initial_error: true,
            thresholds: MonitorThresholds::default(),
        }
    }
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            interval_secs: default_interval_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            identities: default_identities(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            recent_pages_limit: default_recent_pages_limit(),
            links_limit: default_links_limit(),
            finished_runs_kept: default_finished_runs_kept(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Self::from_json(&contents)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Apply environment overrides (currently `WEBDRIVER_URL`)
    pub fn apply_env(&mut self) {
        if let Ok(webdriver_url) = std::env::var("WEBDRIVER_URL") {
            if !webdriver_url.is_empty() {
                self.webdriver.url = webdriver_url;
            }
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn monitor_target(&self) -> &str {
        self.monitor.target_url.as_deref().unwrap_or(&self.site_url)
    }

    pub fn compatibility_target(&self) -> &str {
        self.compatibility
            .target_url
            .as_deref()
            .unwrap_or(&self.site_url)
    }
}

impl CrawlerConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}
