//! Process lifecycle for the long-running services.
//!
//! The supervisor starts each service in order, then waits for either a
//! termination signal or a fatal report (an explicit [`FatalHandle::report`]
//! or a panic anywhere in the process). Either way every started service is
//! stopped, within a bounded time, before the exit status is returned.

use crate::error::ServiceError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A service with an explicit start/stop lifecycle
#[async_trait]
pub trait Supervised: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), ServiceError>;

    /// Must tolerate being called when not running
    async fn stop(&self);
}

/// How the supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Stopped by a termination signal
    Clean,
    /// A service failed to start, or a fatal error was reported
    Failed,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Clean => 0,
            Exit::Failed => 1,
        }
    }
}

/// Reports a fatal error to the supervisor from anywhere in the process
#[derive(Debug, Clone)]
pub struct FatalHandle(mpsc::UnboundedSender<String>);

impl FatalHandle {
    pub fn report(&self, reason: impl Into<String>) {
        if self.0.send(reason.into()).is_err() {
            ::log::debug!("Supervisor already gone, fatal report dropped");
        }
    }
}

pub struct Supervisor {
    services: Vec<Arc<dyn Supervised>>,
    shutdown_timeout: Duration,
    fatal_tx: mpsc::UnboundedSender<String>,
    fatal_rx: mpsc::UnboundedReceiver<String>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            services: Vec::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            fatal_tx,
            fatal_rx,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Services start in the order they are added and stop in reverse
    pub fn add(mut self, service: Arc<dyn Supervised>) -> Self {
        self.services.push(service);
        self
    }

    pub fn fatal_handle(&self) -> FatalHandle {
        FatalHandle(self.fatal_tx.clone())
    }

    /// Turn panics into fatal reports, keeping the existing hook's output
    pub fn install_panic_hook(&self) {
        let fatal = self.fatal_handle();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            fatal.report(format!("panic: {}", info));
        }));
    }

    /// Run until Ctrl-C or SIGTERM
    pub async fn run(self) -> Exit {
        self.run_until(shutdown_signal()).await
    }

    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Exit {
        let mut started: Vec<Arc<dyn Supervised>> = Vec::new();
        for service in &self.services {
            ::log::info!("Starting {}", service.name());
            if let Err(e) = service.start().await {
                ::log::error!("Error starting {}: {}", service.name(), e);
                self.cleanup(&started).await;
                return Exit::Failed;
            }
            ::log::info!("✓ {} started", service.name());
            started.push(Arc::clone(service));
        }

        let exit = tokio::select! {
            _ = shutdown => {
                ::log::info!("Stopping services...");
                Exit::Clean
            }
            Some(reason) = self.fatal_rx.recv() => {
                ::log::error!("Fatal error: {}", reason);
                Exit::Failed
            }
        };
        self.cleanup(&started).await;
        exit
    }

    /// Stop services in reverse start order, giving up after the shutdown timeout
    async fn cleanup(&self, services: &[Arc<dyn Supervised>]) {
        let stop_all = async {
            for service in services.iter().rev() {
                service.stop().await;
                ::log::info!("✓ {} stopped", service.name());
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, stop_all)
            .await
            .is_err()
        {
            ::log::error!(
                "Cleanup did not finish within {:?}, exiting anyway",
                self.shutdown_timeout
            );
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(e) => ::log::warn!("Failed to register SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        ::log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records lifecycle calls into a shared journal
    struct Recorder {
        name: String,
        journal: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
        hang_on_stop: bool,
    }

    impl Recorder {
        fn new(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                journal: Arc::clone(journal),
                fail_start: false,
                hang_on_stop: false,
            }
        }

        fn failing(mut self) -> Self {
            self.fail_start = true;
            self
        }

        fn hanging(mut self) -> Self {
            self.hang_on_stop = true;
            self
        }
    }

    #[async_trait]
    impl Supervised for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> Result<(), ServiceError> {
            self.journal.lock().unwrap().push(format!("start {}", self.name));
            if self.fail_start {
                return Err(ServiceError::Start {
                    name: self.name.clone(),
                    reason: "browser not found".to_string(),
                });
            }
            Ok(())
        }

        async fn stop(&self) {
            if self.hang_on_stop {
                std::future::pending::<()>().await;
            }
            self.journal.lock().unwrap().push(format!("stop {}", self.name));
        }
    }

    fn journal() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(journal: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_signal_stops_services_in_reverse_order() {
        let j = journal();
        let supervisor = Supervisor::new()
            .add(Arc::new(Recorder::new("monitor", &j)))
            .add(Arc::new(Recorder::new("compat", &j)));

        let exit = supervisor.run_until(async {}).await;

        assert_eq!(exit, Exit::Clean);
        assert_eq!(exit.code(), 0);
        assert_eq!(
            entries(&j),
            vec!["start monitor", "start compat", "stop compat", "stop monitor"]
        );
    }

    #[tokio::test]
    async fn test_start_failure_stops_started_services() {
        let j = journal();
        let supervisor = Supervisor::new()
            .add(Arc::new(Recorder::new("monitor", &j)))
            .add(Arc::new(Recorder::new("compat", &j).failing()))
            .add(Arc::new(Recorder::new("crawl", &j)));

        let exit = supervisor.run_until(std::future::pending()).await;

        assert_eq!(exit, Exit::Failed);
        assert_eq!(
            entries(&j),
            vec!["start monitor", "start compat", "stop monitor"]
        );
    }

    #[tokio::test]
    async fn test_fatal_report_fails_after_cleanup() {
        let j = journal();
        let supervisor = Supervisor::new().add(Arc::new(Recorder::new("monitor", &j)));
        let fatal = supervisor.fatal_handle();
        fatal.report("unhandled rejection");

        let exit = supervisor.run_until(std::future::pending()).await;

        assert_eq!(exit, Exit::Failed);
        assert_eq!(exit.code(), 1);
        assert_eq!(entries(&j), vec!["start monitor", "stop monitor"]);
    }

    fn fail_in_task() {
        panic!("worker blew up");
    }

    #[tokio::test]
    async fn test_panic_in_spawned_task_fails_after_cleanup() {
        let j = journal();
        let supervisor = Supervisor::new()
            .add(Arc::new(Recorder::new("monitor", &j)))
            .add(Arc::new(Recorder::new("compat", &j)));
        supervisor.install_panic_hook();

        let task = tokio::spawn(async { fail_in_task() });
        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.run_until(std::future::pending()),
        )
        .await
        .expect("a panic should end the run");

        assert_eq!(exit, Exit::Failed);
        assert_eq!(exit.code(), 1);
        assert_eq!(
            entries(&j),
            vec!["start monitor", "start compat", "stop compat", "stop monitor"]
        );
        assert!(task.await.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn test_hanging_cleanup_is_bounded() {
        let j = journal();
        let supervisor = Supervisor::new()
            .with_shutdown_timeout(Duration::from_millis(50))
            .add(Arc::new(Recorder::new("monitor", &j)))
            .add(Arc::new(Recorder::new("stuck", &j).hanging()));

        let exit = tokio::time::timeout(Duration::from_secs(5), supervisor.run_until(async {}))
            .await
            .expect("cleanup should be bounded");

        assert_eq!(exit, Exit::Clean);
        assert!(!entries(&j).contains(&"stop monitor".to_string()));
    }
}
