use crate::checks::Report;
use crate::store::{SqliteStore, run_blocking};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Destination for check reports. Emitting never fails the cycle.
#[async_trait]
pub trait ReportSink<R: Report>: Send + Sync {
    async fn emit(&self, kind: &str, report: &R);
}

/// Logs every report as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl<R: Report> ReportSink<R> for LogSink {
    async fn emit(&self, kind: &str, report: &R) {
        match serde_json::to_string(report) {
            Ok(json) => ::log::info!("{} check [{}]: {}", kind, report.status(), json),
            Err(e) => ::log::warn!("Failed to serialize {} report: {}", kind, e),
        }
    }
}

/// Appends every report to the `reports` table
#[async_trait]
impl<R: Report> ReportSink<R> for Arc<SqliteStore> {
    async fn emit(&self, kind: &str, report: &R) {
        let body = match serde_json::to_value(report) {
            Ok(body) => body,
            Err(e) => {
                ::log::error!("Failed to store {} report: {}", kind, e);
                return;
            }
        };
        let (owned_kind, status, created_at) =
            (kind.to_string(), report.status(), report.timestamp());
        let stored = run_blocking(self, move |store| {
            store.record_report(&owned_kind, status, created_at, &body)
        })
        .await;
        if let Err(e) = stored {
            ::log::error!("Failed to store {} report: {}", kind, e);
        }
    }
}

#[async_trait]
impl<R: Report> ReportSink<R> for UnboundedSender<R> {
    async fn emit(&self, kind: &str, report: &R) {
        if self.send(report.clone()).is_err() {
            ::log::debug!("Dropping {} report, receiver is gone", kind);
        }
    }
}
