use crate::browser::BrowserLauncher;
use crate::config::CrawlerConfig;
use crate::crawlers::web::{CrawlEngine, StopHandle};
use crate::error::ServiceError;
use crate::store::ResultStore;
use crate::supervisor::Supervised;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Re-crawls the site every `interval`, starting one interval after `start`.
///
/// Enabled by the `scheduled_crawl` switch. A failed run is logged and the
/// next one still happens on schedule.
pub struct ScheduledCrawl {
    site_url: String,
    interval: Duration,
    config: CrawlerConfig,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<dyn ResultStore>,
    task: AsyncMutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
    slot: Arc<Mutex<RunSlot>>,
}

/// Whether the schedule is stopping, and the run in progress if any.
/// A run is only launched while holding this lock with `stopping` unset.
#[derive(Debug, Default)]
struct RunSlot {
    stopping: bool,
    current: Option<StopHandle>,
}

fn lock(slot: &Mutex<RunSlot>) -> MutexGuard<'_, RunSlot> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ScheduledCrawl {
    pub fn new(
        site_url: &str,
        interval: Duration,
        config: CrawlerConfig,
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            site_url: site_url.to_string(),
            interval: interval.max(Duration::from_millis(1)),
            config,
            launcher,
            store,
            task: AsyncMutex::new(None),
            slot: Arc::new(Mutex::new(RunSlot::default())),
        }
    }

    fn engine(&self) -> Result<CrawlEngine, ServiceError> {
        CrawlEngine::new(
            &self.site_url,
            self.config.clone(),
            Arc::clone(&self.launcher),
            Arc::clone(&self.store),
        )
        .map_err(|e| ServiceError::Start {
            name: "scheduled crawl".to_string(),
            reason: e.to_string(),
        })
    }

    async fn crawl_once(
        site_url: &str,
        config: &CrawlerConfig,
        launcher: &Arc<dyn BrowserLauncher>,
        store: &Arc<dyn ResultStore>,
        slot: &Mutex<RunSlot>,
    ) {
        let engine = match CrawlEngine::new(
            site_url,
            config.clone(),
            Arc::clone(launcher),
            Arc::clone(store),
        ) {
            Ok(engine) => engine,
            Err(e) => {
                ::log::error!("Error during periodic crawl: {}", e);
                return;
            }
        };
        {
            let mut slot = lock(slot);
            if slot.stopping {
                ::log::debug!("Schedule stopping, skipping crawl of {}", site_url);
                return;
            }
            slot.current = Some(engine.stop_handle());
        }
        match engine.run().await {
            Ok(summary) => ::log::info!(
                "Periodic crawl of {} finished ({:?}): {} pages, {} failed",
                summary.seed,
                summary.stop_reason,
                summary.pages_attempted,
                summary.pages_failed
            ),
            Err(e) => ::log::error!("Error during periodic crawl: {}", e),
        }
        lock(slot).current = None;
    }
}

#[async_trait]
impl Supervised for ScheduledCrawl {
    fn name(&self) -> &str {
        "scheduled crawl"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }
        // Reject a bad site URL now rather than once per interval
        self.engine()?;
        lock(&self.slot).stopping = false;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let site_url = self.site_url.clone();
        let config = self.config.clone();
        let launcher = Arc::clone(&self.launcher);
        let store = Arc::clone(&self.store);
        let slot = Arc::clone(&self.slot);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ScheduledCrawl::crawl_once(&site_url, &config, &launcher, &store, &slot).await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        *task = Some((stop_tx, handle));
        ::log::info!(
            "Scheduled crawl of {} every {:?}",
            self.site_url,
            self.interval
        );
        Ok(())
    }

    async fn stop(&self) {
        let Some((stop_tx, handle)) = self.task.lock().await.take() else {
            return;
        };
        {
            let mut slot = lock(&self.slot);
            slot.stopping = true;
            if let Some(run) = slot.current.as_ref() {
                ::log::info!("Stopping in-progress scheduled crawl");
                run.stop();
            }
        }
        let _ = stop_tx.send(true);
        if let Err(e) = handle.await {
            ::log::warn!("Scheduled crawl task ended abnormally: {}", e);
        }
    }
}
