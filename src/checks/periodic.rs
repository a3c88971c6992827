use crate::browser::{Browser, BrowserLauncher};
use crate::checks::{Check, ReportSink};
use crate::error::{CheckError, ServiceError};
use crate::supervisor::Supervised;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Runs a [`Check`] now and then every `interval`, against a browser it owns.
///
/// `start` and `stop` are both idempotent. Stopping cancels the timer but
/// lets a cycle that is already running finish; such a cycle sees the closed
/// browser as an ordinary per-check failure.
pub struct PeriodicChecker<C: Check> {
    cycle: Cycle<C>,
    launcher: Arc<dyn BrowserLauncher>,
    interval: Duration,
    fail_on_initial_error: bool,
    state: AsyncMutex<Running>,
}

#[derive(Default)]
struct Running {
    browser: Option<Arc<dyn Browser>>,
    stop: Option<watch::Sender<bool>>,
    timer: Option<JoinHandle<()>>,
}

/// What one cycle needs, shared with the timer task
struct Cycle<C: Check> {
    check: Arc<C>,
    sinks: Arc<Vec<Arc<dyn ReportSink<C::Report>>>>,
    latest: Arc<Mutex<Option<C::Report>>>,
}

impl<C: Check> Clone for Cycle<C> {
    fn clone(&self) -> Self {
        Self {
            check: Arc::clone(&self.check),
            sinks: Arc::clone(&self.sinks),
            latest: Arc::clone(&self.latest),
        }
    }
}

impl<C: Check> Cycle<C> {
    async fn run_once(&self, browser: &dyn Browser) -> C::Report {
        let report = self.check.run(browser).await;
        for sink in self.sinks.iter() {
            sink.emit(self.check.kind(), &report).await;
        }
        match self.latest.lock() {
            Ok(mut latest) => *latest = Some(report.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
        }
        report
    }

    async fn schedule(
        self,
        browser: Arc<dyn Browser>,
        period: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ::log::debug!("Running scheduled {} check", self.check.name());
                    self.run_once(browser.as_ref()).await;
                }
                _ = stop.changed() => break,
            }
        }
        ::log::debug!("{} timer cancelled", self.check.name());
    }
}

impl<C: Check> PeriodicChecker<C> {
    pub fn new(check: C, launcher: Arc<dyn BrowserLauncher>, interval: Duration) -> Self {
        Self {
            cycle: Cycle {
                check: Arc::new(check),
                sinks: Arc::new(Vec::new()),
                latest: Arc::new(Mutex::new(None)),
            },
            launcher,
            // tokio intervals reject a zero period
            interval: interval.max(Duration::from_millis(1)),
            fail_on_initial_error: false,
            state: AsyncMutex::new(Running::default()),
        }
    }

    /// Refuse to start when the immediate first check is unhealthy
    pub fn fail_on_initial_error(mut self, fail: bool) -> Self {
        self.fail_on_initial_error = fail;
        self
    }

    pub fn with_sink(mut self, sink: impl ReportSink<C::Report> + 'static) -> Self {
        let mut sinks: Vec<_> = self.cycle.sinks.iter().cloned().collect();
        sinks.push(Arc::new(sink));
        self.cycle.sinks = Arc::new(sinks);
        self
    }

    pub fn check(&self) -> &C {
        &self.cycle.check
    }

    pub fn name(&self) -> &str {
        self.cycle.check.name()
    }

    /// Report of the most recent cycle
    pub fn latest(&self) -> Option<C::Report> {
        match self.cycle.latest.lock() {
            Ok(latest) => latest.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Launch the browser, run one check immediately, then arm the timer
    pub async fn start(&self) -> Result<(), CheckError> {
        let mut state = self.state.lock().await;
        if state.browser.is_some() {
            ::log::info!("{} is already running", self.name());
            return Ok(());
        }

        let browser = self
            .launcher
            .launch()
            .await
            .map_err(|source| CheckError::Launch {
                name: self.name().to_string(),
                source,
            })?;

        let report = self.cycle.run_once(browser.as_ref()).await;
        if self.fail_on_initial_error {
            if let Some(reason) = self.cycle.check.failure(&report) {
                ::log::error!("Failed to start {}: {}", self.name(), reason);
                close_browser(self.name(), browser.as_ref()).await;
                return Err(CheckError::InitialCheck {
                    name: self.name().to_string(),
                    reason,
                });
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let timer = tokio::spawn(self.cycle.clone().schedule(
            Arc::clone(&browser),
            self.interval,
            stop_rx,
        ));

        *state = Running {
            browser: Some(browser),
            stop: Some(stop_tx),
            timer: Some(timer),
        };
        ::log::info!("{} started, checking every {:?}", self.name(), self.interval);
        Ok(())
    }

    /// Cancel the timer and close the browser. A no-op when not running.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(stop) = state.stop.take() {
            // the timer may already be gone
            let _ = stop.send(true);
        }
        state.timer.take();
        if let Some(browser) = state.browser.take() {
            close_browser(self.name(), browser.as_ref()).await;
            ::log::info!("{} stopped", self.name());
        }
    }
}

async fn close_browser(name: &str, browser: &dyn Browser) {
    if let Err(e) = browser.close().await {
        ::log::warn!("Error closing browser for {}: {}", name, e);
    }
}

#[async_trait]
impl<C: Check> Supervised for PeriodicChecker<C> {
    fn name(&self) -> &str {
        PeriodicChecker::name(self)
    }

    async fn start(&self) -> Result<(), ServiceError> {
        Ok(PeriodicChecker::start(self).await?)
    }

    async fn stop(&self) {
        PeriodicChecker::stop(self).await
    }
}
