//! Single-page inspection shared by the crawler, the site monitor and the
//! compatibility checker: open a page, navigate, settle, extract, close.

use crate::browser::{Browser, Page, scripts};
use crate::config::{CrawlerConfig, IdleConfig};
use crate::error::BrowserError;
use crate::parsers;
use crate::results::PageResult;
use serde::Deserialize;
use std::time::{Duration, Instant};
use url::Url;

/// How a page is visited
#[derive(Debug, Clone)]
pub struct InspectOptions {
    pub user_agent: String,
    pub navigation_timeout: Duration,
    pub idle: IdleConfig,
}

impl InspectOptions {
    pub fn from_crawler(config: &CrawlerConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            navigation_timeout: config.navigation_timeout(),
            idle: config.idle.clone(),
        }
    }
}

/// A successfully inspected page
#[derive(Debug, Clone)]
pub struct Inspection {
    pub page: PageResult,
    /// Raw absolute hrefs; normalization and scoping are up to the caller
    pub links: Vec<String>,
    /// Wall time from navigation start to extraction end
    pub load_time: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PaintTimings {
    first_contentful_paint: f64,
    largest_contentful_paint: f64,
    time_to_interactive: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Readiness {
    complete: bool,
    resources: u64,
}

/// Visits `url` in a fresh page and extracts SEO fields, paint timings and links.
///
/// Exactly one page is opened, and it is closed on every path; a failing
/// close is logged and never replaces the inspection outcome. Errors mean the
/// navigation or the DOM snapshot failed; a missing paint timing does not.
pub async fn inspect(
    browser: &dyn Browser,
    url: &str,
    options: &InspectOptions,
) -> Result<Inspection, BrowserError> {
    let page = browser.new_page(&options.user_agent).await?;
    let outcome = extract(page.as_ref(), url, options).await;
    if let Err(e) = page.close().await {
        ::log::warn!("Error closing page for {}: {}", url, e);
    }
    outcome
}

async fn extract(
    page: &dyn Page,
    url: &str,
    options: &InspectOptions,
) -> Result<Inspection, BrowserError> {
    let started = Instant::now();
    let navigation = page.goto(url, options.navigation_timeout).await?;
    wait_for_idle(page, &options.idle).await;

    let (html, timings) = tokio::join!(page.content(), paint_timings(page));
    let html = html?;

    let base = resolve_base(page, url).await?;
    let doc = parsers::parse(&html, &base);

    let result = PageResult {
        url: url.to_string(),
        status: navigation.status,
        title: doc.title,
        description: doc.description,
        h1_count: doc.h1_count,
        image_count: doc.image_count,
        link_count: doc.link_count,
        first_contentful_paint: timings.first_contentful_paint,
        largest_contentful_paint: timings.largest_contentful_paint,
        time_to_interactive: timings.time_to_interactive,
        html: Some(html),
        crawled_at: None,
        error: None,
    };

    Ok(Inspection {
        page: result,
        links: doc.links,
        load_time: started.elapsed(),
    })
}

/// URL links are resolved against: where the page landed, else where it was sent
async fn resolve_base(page: &dyn Page, url: &str) -> Result<Url, BrowserError> {
    if let Ok(landed) = page.current_url().await {
        if let Ok(parsed) = Url::parse(&landed) {
            return Ok(parsed);
        }
    }
    Url::parse(url).map_err(|e| BrowserError::Navigation {
        url: url.to_string(),
        message: e.to_string(),
    })
}

async fn paint_timings(page: &dyn Page) -> PaintTimings {
    match page.evaluate(scripts::PAINT_TIMINGS).await {
        Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            ::log::warn!("Malformed paint timings: {}", e);
            PaintTimings::default()
        }),
        Err(e) => {
            ::log::warn!("Paint timings unavailable: {}", e);
            PaintTimings::default()
        }
    }
}

/// Waits until the document is complete and its resource count has held
/// steady for the quiet window. Gives up quietly after `max_wait_ms`.
pub(crate) async fn wait_for_idle(page: &dyn Page, idle: &IdleConfig) {
    let quiet = Duration::from_millis(idle.quiet_window_ms);
    let deadline = Instant::now() + Duration::from_millis(idle.max_wait_ms);
    let mut last: Option<u64> = None;

    loop {
        let readiness: Readiness = match page.evaluate(scripts::READINESS).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(e) => {
                ::log::debug!("Idle wait aborted: {}", e);
                return;
            }
        };

        if readiness.complete && last == Some(readiness.resources) {
            return;
        }
        last = readiness.complete.then_some(readiness.resources);

        if Instant::now() >= deadline {
            ::log::debug!("Page did not settle within {}ms", idle.max_wait_ms);
            return;
        }
        tokio::time::sleep(quiet).await;
    }
}
