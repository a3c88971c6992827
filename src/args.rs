use clap::{Parser, Subcommand};
use hrefbot::AppConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hrefbot")]
#[command(about = "Same-origin crawler with a site monitor and browser compatibility checker")]
#[command(version)]
pub struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// WebDriver endpoint (takes precedence over WEBDRIVER_URL)
    #[arg(long, global = true)]
    pub webdriver_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl a site once and print the run summary as JSON
    Crawl {
        /// Seed URL
        url: String,

        /// Maximum number of pages in flight
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Maximum number of pages to visit
        #[arg(long)]
        max_pages: Option<usize>,

        /// Total timeout in seconds (maximum runtime)
        #[arg(long)]
        total_timeout: Option<u64>,
    },

    /// Run the site monitor and compatibility checker until interrupted
    Monitor,

    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
        if let Some(webdriver_url) = &self.webdriver_url {
            config.webdriver.url = webdriver_url.clone();
        }
        match &self.command {
            Command::Crawl {
                concurrency,
                max_pages,
                total_timeout,
                ..
            } => {
                if let Some(concurrency) = concurrency {
                    config.crawler.max_concurrency = *concurrency;
                }
                if let Some(max_pages) = max_pages {
                    config.crawler.max_pages = *max_pages;
                }
                if total_timeout.is_some() {
                    config.crawler.max_duration_secs = *total_timeout;
                }
            }
            Command::Serve { bind: Some(bind) } => config.server.bind = bind.clone(),
            Command::Serve { bind: None } | Command::Monitor => {}
        }
    }
}
