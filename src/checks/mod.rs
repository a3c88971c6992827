//! Periodic page-based checks: the site monitor and the compatibility checker.
//!
//! Both are a [`Check`] plugged into the shared [`PeriodicChecker`], which
//! owns the browser, the timer and the report sinks.

pub mod compatibility;
pub mod monitor;
pub mod periodic;
pub mod sink;

use crate::browser::Browser;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use compatibility::{BrowserTest, CompatibilityCheck, CompatibilityReport};
pub use monitor::{MonitorCheck, MonitorStatus, MonitoringResult};
pub use periodic::PeriodicChecker;
pub use sink::{LogSink, ReportSink};

/// Periodic site health monitor
pub type SiteMonitor = PeriodicChecker<MonitorCheck>;

/// Periodic multi-identity compatibility checker
pub type CompatibilityChecker = PeriodicChecker<CompatibilityCheck>;

/// A report produced by one check cycle
pub trait Report: Serialize + Clone + Send + Sync + 'static {
    fn timestamp(&self) -> DateTime<Utc>;

    /// Short status label stored next to the report
    fn status(&self) -> &'static str;
}

/// One kind of periodic check.
///
/// `run` never fails: whatever goes wrong during a cycle is captured in the
/// report it returns.
#[async_trait]
pub trait Check: Send + Sync + 'static {
    type Report: Report;

    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Kind recorded with persisted reports
    fn kind(&self) -> &'static str;

    async fn run(&self, browser: &dyn Browser) -> Self::Report;

    /// Why a report counts as unhealthy, if it does
    fn failure(&self, report: &Self::Report) -> Option<String>;
}
