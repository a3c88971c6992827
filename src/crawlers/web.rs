use crate::browser::{Browser, BrowserLauncher};
use crate::config::CrawlerConfig;
use crate::crawlers::frontier::Frontier;
use crate::error::{BrowserError, CrawlError};
use crate::filter::{UrlFilter, UrlFilterConfig, parse_http_url};
use crate::inspector::{self, InspectOptions, Inspection};
use crate::results::{CrawlSummary, PageResult, StopReason};
use crate::store::{ResultStore, run_blocking};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Cooperative stop request for a running crawl. In-flight visits finish.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Explores the same-origin subgraph reachable from a seed URL.
///
/// One engine drives one run: `start` launches the browser (the only fatal
/// step) and hands back a [`CrawlRun`]. Every dispatched page is written to
/// the store, failed ones as error rows, and every in-scope link becomes an
/// edge.
pub struct CrawlEngine {
    seed: String,
    filter: Arc<UrlFilter>,
    config: CrawlerConfig,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<dyn ResultStore>,
    stop: StopHandle,
}

impl CrawlEngine {
    pub fn new(
        start_url: &str,
        config: CrawlerConfig,
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self, CrawlError> {
        if start_url.trim().is_empty() {
            return Err(CrawlError::MissingUrl);
        }
        let seed = parse_http_url(start_url).map_err(CrawlError::InvalidUrl)?;

        let filter_config = UrlFilterConfig {
            required_path_prefix: config
                .restrict_to_seed_path
                .then(|| seed.path().to_string()),
            include_patterns: config.include_patterns.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
        };
        let filter = UrlFilter::new(&seed, filter_config)?;

        Ok(Self {
            seed: seed.to_string(),
            filter: Arc::new(filter),
            config,
            launcher,
            store,
            stop: StopHandle::default(),
        })
    }

    /// Normalized seed URL
    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Launch the browser and start dispatching in the background
    pub async fn start(self) -> Result<CrawlRun, CrawlError> {
        ::log::info!("Starting crawl for: {}", self.seed);

        let browser = match self.launcher.launch().await {
            Ok(browser) => browser,
            Err(e) => {
                ::log::error!("Crawl for {} failed to launch browser: {}", self.seed, e);
                return Err(CrawlError::BrowserLaunch(e));
            }
        };

        let seed = self.seed.clone();
        let dispatcher = Dispatcher::new(self);
        let handle = tokio::spawn(dispatcher.run(browser));

        Ok(CrawlRun { seed, handle })
    }

    /// Start and wait for the run to finish
    pub async fn run(self) -> Result<CrawlSummary, CrawlError> {
        self.start().await?.wait().await
    }
}

/// A crawl that is dispatching or draining
pub struct CrawlRun {
    seed: String,
    handle: JoinHandle<CrawlSummary>,
}

impl CrawlRun {
    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub async fn wait(self) -> Result<CrawlSummary, CrawlError> {
        self.handle
            .await
            .map_err(|e| CrawlError::Aborted(e.to_string()))
    }
}

struct VisitOutcome {
    url: String,
    result: Result<Inspection, BrowserError>,
}

type Visit = BoxFuture<'static, VisitOutcome>;

/// Owns the frontier for one run. Visits are polled from this task only, so
/// every frontier mutation happens in one place, between suspension points.
struct Dispatcher {
    seed: String,
    filter: Arc<UrlFilter>,
    config: CrawlerConfig,
    options: Arc<InspectOptions>,
    store: Arc<dyn ResultStore>,
    stop: StopHandle,
    frontier: Frontier,
    succeeded: usize,
    failed: usize,
    storage_failures: usize,
    edges_recorded: usize,
}

impl Dispatcher {
    fn new(engine: CrawlEngine) -> Self {
        Self {
            frontier: Frontier::with_seed(&engine.seed),
            options: Arc::new(InspectOptions::from_crawler(&engine.config)),
            seed: engine.seed,
            filter: engine.filter,
            config: engine.config,
            store: engine.store,
            stop: engine.stop,
            succeeded: 0,
            failed: 0,
            storage_failures: 0,
            edges_recorded: 0,
        }
    }

    async fn run(mut self, browser: Arc<dyn Browser>) -> CrawlSummary {
        let started_at = Utc::now();
        let deadline = self.config.max_duration().map(|d| Instant::now() + d);
        let max_concurrency = self.config.max_concurrency.max(1);
        let mut in_flight: FuturesUnordered<Visit> = FuturesUnordered::new();

        let stop_reason = loop {
            if self.stop.is_stopped() {
                break StopReason::Stopped;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break StopReason::DeadlineExceeded;
            }
            if self.frontier.seen_count() >= self.config.max_pages {
                break StopReason::BudgetReached;
            }
            if self.frontier.is_empty() && in_flight.is_empty() {
                break StopReason::Exhausted;
            }

            if in_flight.len() < max_concurrency {
                if let Some(url) = self.frontier.dequeue() {
                    ::log::debug!(
                        "Dispatching {} ({} in flight, {} queued)",
                        url,
                        in_flight.len() + 1,
                        self.frontier.pending()
                    );
                    in_flight.push(visit(Arc::clone(&browser), url, Arc::clone(&self.options)));
                    self.pause(&mut in_flight, self.config.crawl_delay()).await;
                    continue;
                }
            }
            self.pause(&mut in_flight, self.config.backoff()).await;
        };

        if !in_flight.is_empty() {
            ::log::info!(
                "Crawl of {} stopping ({:?}), draining {} in-flight pages",
                self.seed,
                stop_reason,
                in_flight.len()
            );
        }
        while let Some(outcome) = in_flight.next().await {
            self.complete(outcome).await;
        }

        if let Err(e) = browser.close().await {
            ::log::warn!("Error closing browser: {}", e);
        }

        let summary = CrawlSummary {
            seed: self.seed.clone(),
            pages_attempted: self.frontier.seen_count(),
            pages_succeeded: self.succeeded,
            pages_failed: self.failed,
            storage_failures: self.storage_failures,
            edges_recorded: self.edges_recorded,
            stop_reason,
            started_at,
            finished_at: Utc::now(),
        };
        ::log::info!(
            "Crawl of {} complete - {} pages ({} ok, {} failed), {} storage failures",
            summary.seed,
            summary.pages_attempted,
            summary.pages_succeeded,
            summary.pages_failed,
            summary.storage_failures
        );
        summary
    }

    /// Sleep for `duration` while still handling visits that complete meanwhile
    async fn pause(&mut self, in_flight: &mut FuturesUnordered<Visit>, duration: Duration) {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => self.complete(outcome).await,
                _ = &mut sleep => break,
            }
        }
    }

    /// Record a finished visit and grow the frontier from its links
    async fn complete(&mut self, outcome: VisitOutcome) {
        let url = outcome.url;
        let write = match outcome.result {
            Ok(inspection) => {
                self.succeeded += 1;
                ::log::info!(
                    "[{}] {} | Links: {}",
                    inspection
                        .page
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    url,
                    inspection.links.len()
                );
                let edges: Vec<String> = inspection
                    .links
                    .iter()
                    .filter_map(|link| self.filter.accept(link))
                    .collect();
                for link in &edges {
                    if self.frontier.enqueue(link.clone()) {
                        ::log::debug!("Queuing link for crawling: {}", link);
                    }
                }
                PageWrite::Page {
                    page: inspection.page,
                    edges,
                }
            }
            Err(e) => {
                self.failed += 1;
                ::log::warn!("Error crawling {}: {}", url, e);
                PageWrite::Failure {
                    url,
                    error: e.to_string(),
                }
            }
        };

        let operations = write.operations();
        match run_blocking(&self.store, move |store| Ok(write.apply(store))).await {
            Ok(written) => {
                self.edges_recorded += written.edges;
                self.storage_failures += written.failures;
            }
            Err(e) => {
                self.storage_failures += operations;
                ::log::error!("Storage task failed: {}", e);
            }
        }
    }
}

/// Store writes for one finished visit
enum PageWrite {
    Page { page: PageResult, edges: Vec<String> },
    Failure { url: String, error: String },
}

#[derive(Debug, Default)]
struct Written {
    edges: usize,
    failures: usize,
}

impl PageWrite {
    fn operations(&self) -> usize {
        match self {
            PageWrite::Page { edges, .. } => 1 + edges.len(),
            PageWrite::Failure { .. } => 1,
        }
    }

    /// Each write stands alone; a failed one is logged and counted
    fn apply(self, store: &dyn ResultStore) -> Written {
        let mut written = Written::default();
        match self {
            PageWrite::Failure { url, error } => {
                if let Err(e) = store.upsert_page_error(&url, &error) {
                    written.failures += 1;
                    ::log::error!("Failed to store error for {}: {}", url, e);
                }
            }
            PageWrite::Page { page, edges } => {
                if let Err(e) = store.upsert_page(&page) {
                    written.failures += 1;
                    ::log::error!("Failed to store page {}: {}", page.url, e);
                }
                for to_url in &edges {
                    match store.insert_link_edge(&page.url, to_url) {
                        Ok(true) => written.edges += 1,
                        Ok(false) => {}
                        Err(e) => {
                            written.failures += 1;
                            ::log::error!("Failed to store link {} -> {}: {}", page.url, to_url, e);
                        }
                    }
                }
            }
        }
        written
    }
}

fn visit(browser: Arc<dyn Browser>, url: String, options: Arc<InspectOptions>) -> Visit {
    async move {
        let result = inspector::inspect(browser.as_ref(), &url, &options).await;
        VisitOutcome { url, result }
    }
    .boxed()
}
