use clap::Parser;
use hrefbot::checks::compatibility::CompatibilityCheck;
use hrefbot::checks::monitor::MonitorCheck;
use hrefbot::checks::{CompatibilityChecker, LogSink, PeriodicChecker, SiteMonitor};
use hrefbot::inspector::InspectOptions;
use hrefbot::server::{self, AppState};
use hrefbot::{
    AppConfig, BrowserLauncher, CrawlEngine, ScheduledCrawl, SqliteStore, Supervisor,
    WebDriverLauncher,
};
use std::sync::Arc;
use std::time::Duration;

mod args;
use args::{Args, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    config.apply_env();
    args.apply(&mut config);

    ::log::info!("Using WebDriver at {}", config.webdriver.url);
    let launcher: Arc<dyn BrowserLauncher> =
        Arc::new(WebDriverLauncher::new(config.webdriver.clone()));
    let store = Arc::new(SqliteStore::open(&config.database_path)?);

    match args.command {
        Command::Crawl { url, .. } => {
            let engine = CrawlEngine::new(&url, config.crawler.clone(), launcher, store)?;
            let summary = engine.run().await?;
            if !summary.is_complete() {
                ::log::warn!(
                    "Crawl finished with {} failed pages and {} storage failures",
                    summary.pages_failed,
                    summary.storage_failures
                );
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Monitor => {
            ::log::info!("Starting monitoring services...");
            let supervisor = build_supervisor(&config, launcher, store);
            let exit = supervisor.run().await;
            std::process::exit(exit.code());
        }
        Command::Serve { .. } => {
            let state = AppState::new(
                store,
                launcher,
                config.crawler.clone(),
                config.server.clone(),
            );
            server::serve(state, &config.server.bind).await?;
        }
    }

    Ok(())
}

fn build_supervisor(
    config: &AppConfig,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<SqliteStore>,
) -> Supervisor {
    let monitor: SiteMonitor = PeriodicChecker::new(
        MonitorCheck::new(
            config.monitor_target(),
            InspectOptions::from_crawler(&config.crawler),
            config.monitor.thresholds.clone(),
        ),
        Arc::clone(&launcher),
        Duration::from_secs(config.monitor.interval_secs),
    )
    .fail_on_initial_error(config.monitor.fail_on_initial_error)
    .with_sink(LogSink)
    .with_sink(Arc::clone(&store));

    let compatibility: CompatibilityChecker = PeriodicChecker::new(
        CompatibilityCheck::new(
            config.compatibility_target(),
            config.compatibility.identities.clone(),
            Duration::from_secs(config.compatibility.navigation_timeout_secs),
            config.crawler.idle.clone(),
        ),
        Arc::clone(&launcher),
        Duration::from_secs(config.compatibility.interval_secs),
    )
    .with_sink(LogSink)
    .with_sink(Arc::clone(&store));

    let mut supervisor = Supervisor::new()
        .with_shutdown_timeout(config.shutdown_timeout())
        .add(Arc::new(monitor))
        .add(Arc::new(compatibility));

    if config.scheduled_crawl {
        supervisor = supervisor.add(Arc::new(ScheduledCrawl::new(
            &config.site_url,
            Duration::from_secs(config.scheduled_crawl_interval_secs),
            config.crawler.clone(),
            launcher,
            store,
        )));
    }

    supervisor.install_panic_hook();
    supervisor
}
