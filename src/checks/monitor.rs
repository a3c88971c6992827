use crate::browser::Browser;
use crate::checks::{Check, Report};
use crate::config::MonitorThresholds;
use crate::inspector::{self, InspectOptions};
use crate::results::PageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SLOW_PAINT_WARNING: &str = "First contentful paint is too slow";
pub const NO_H1_WARNING: &str = "No H1 tags found";
pub const SHORT_DESCRIPTION_WARNING: &str = "Meta description is too short";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub first_contentful_paint: f64,
    pub largest_contentful_paint: f64,
    pub time_to_interactive: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoMetrics {
    pub title: String,
    pub description: String,
    pub h1_count: u32,
    pub image_count: u32,
    pub link_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorMetrics {
    /// Navigation start to extraction end, 0 when the check failed
    pub load_time_ms: u64,
    pub performance: PerformanceMetrics,
    pub seo: SeoMetrics,
}

impl From<&PageResult> for MonitorMetrics {
    fn from(page: &PageResult) -> Self {
        Self {
            load_time_ms: 0,
            performance: PerformanceMetrics {
                first_contentful_paint: page.first_contentful_paint,
                largest_contentful_paint: page.largest_contentful_paint,
                time_to_interactive: page.time_to_interactive,
            },
            seo: SeoMetrics {
                title: page.title.clone(),
                description: page.description.clone(),
                h1_count: page.h1_count,
                image_count: page.image_count,
                link_count: page.link_count,
            },
        }
    }
}

/// Outcome of one monitoring cycle.
///
/// `errors` holds threshold warnings on success and the failure message on
/// error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringResult {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub status: MonitorStatus,
    pub metrics: MonitorMetrics,
    pub errors: Vec<String>,
}

impl Report for MonitoringResult {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn status(&self) -> &'static str {
        match self.status {
            MonitorStatus::Success => "success",
            MonitorStatus::Error => "error",
        }
    }
}

/// Inspects one fixed URL and grades it against [`MonitorThresholds`]
pub struct MonitorCheck {
    target: String,
    options: InspectOptions,
    thresholds: MonitorThresholds,
}

impl MonitorCheck {
    pub fn new(target: &str, options: InspectOptions, thresholds: MonitorThresholds) -> Self {
        Self {
            target: target.to_string(),
            options,
            thresholds,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn warnings(&self, metrics: &MonitorMetrics) -> Vec<String> {
        let mut warnings = Vec::new();
        if metrics.performance.first_contentful_paint > self.thresholds.max_first_contentful_paint_ms
        {
            warnings.push(SLOW_PAINT_WARNING.to_string());
        }
        if metrics.seo.h1_count < self.thresholds.min_h1_count {
            warnings.push(NO_H1_WARNING.to_string());
        }
        if metrics.seo.description.chars().count() < self.thresholds.min_description_len {
            warnings.push(SHORT_DESCRIPTION_WARNING.to_string());
        }
        warnings
    }
}

#[async_trait]
impl Check for MonitorCheck {
    type Report = MonitoringResult;

    fn name(&self) -> &str {
        "site monitor"
    }

    fn kind(&self) -> &'static str {
        "monitoring"
    }

    async fn run(&self, browser: &dyn Browser) -> MonitoringResult {
        match inspector::inspect(browser, &self.target, &self.options).await {
            Ok(inspection) => {
                let mut metrics = MonitorMetrics::from(&inspection.page);
                metrics.load_time_ms = inspection.load_time.as_millis() as u64;
                let errors = self.warnings(&metrics);
                MonitoringResult {
                    timestamp: Utc::now(),
                    url: self.target.clone(),
                    status: MonitorStatus::Success,
                    metrics,
                    errors,
                }
            }
            Err(e) => {
                ::log::error!("Error checking site {}: {}", self.target, e);
                MonitoringResult {
                    timestamp: Utc::now(),
                    url: self.target.clone(),
                    status: MonitorStatus::Error,
                    metrics: MonitorMetrics::default(),
                    errors: vec![e.to_string()],
                }
            }
        }
    }

    fn failure(&self, report: &MonitoringResult) -> Option<String> {
        match report.status {
            MonitorStatus::Success => None,
            MonitorStatus::Error => Some(report.errors.join(", ")),
        }
    }
}
