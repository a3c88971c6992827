use crate::browser::{Browser, Page, scripts};
use crate::checks::{Check, Report};
use crate::config::{BrowserIdentity, IdleConfig};
use crate::error::BrowserError;
use crate::inspector::wait_for_idle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Features reported by the functional battery
pub const FUNCTIONAL_FEATURES: [&str; 4] = ["navigation", "forms", "animations", "responsive"];

const NAVIGATION_POLL: Duration = Duration::from_millis(100);

pub const RECOMMENDATIONS: [&str; 3] = [
    "Implement fallbacks for unsupported features",
    "Add polyfills where necessary",
    "Consider progressive enhancement",
];

/// Feature support observed for one simulated browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTest {
    pub name: String,
    pub version: String,
    pub user_agent: String,
    pub features: BTreeMap<String, bool>,
    /// Set when the identity could not be probed at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BrowserTest {
    fn new(identity: &BrowserIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            version: identity.version.clone(),
            user_agent: identity.user_agent.clone(),
            features: BTreeMap::new(),
            error: None,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.name, self.version)
    }

    /// Percentage of probed features that are supported, 0 when none were probed
    pub fn support_percentage(&self) -> f64 {
        if self.features.is_empty() {
            return 0.0;
        }
        let supported = self.features.values().filter(|s| **s).count();
        supported as f64 / self.features.len() as f64 * 100.0
    }

    fn issues(&self) -> Vec<String> {
        if let Some(error) = &self.error {
            return vec![format!("{}: check failed: {}", self.label(), error)];
        }
        self.features
            .iter()
            .filter(|(_, supported)| !**supported)
            .map(|(feature, _)| format!("{}: {} not supported", self.label(), feature))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    pub timestamp: DateTime<Utc>,
    pub total_browsers: usize,
    /// Support percentage per `"<name> <version>"`
    pub compatibility: BTreeMap<String, f64>,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub browsers: Vec<BrowserTest>,
}

impl CompatibilityReport {
    fn from_results(results: &BTreeMap<String, BrowserTest>) -> Self {
        let compatibility = results
            .iter()
            .map(|(label, test)| (label.clone(), test.support_percentage()))
            .collect();
        let issues: Vec<String> = results.values().flat_map(BrowserTest::issues).collect();
        let recommendations = if issues.is_empty() {
            Vec::new()
        } else {
            RECOMMENDATIONS.iter().map(|r| r.to_string()).collect()
        };

        Self {
            timestamp: Utc::now(),
            total_browsers: results.len(),
            compatibility,
            issues,
            recommendations,
            browsers: results.values().cloned().collect(),
        }
    }
}

impl Report for CompatibilityReport {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn status(&self) -> &'static str {
        if self.issues.is_empty() { "ok" } else { "issues" }
    }
}

/// Probes one target URL under every configured browser identity.
///
/// Identities are probed concurrently, each in its own page; one failing
/// identity never stops the others.
pub struct CompatibilityCheck {
    target: String,
    identities: Vec<BrowserIdentity>,
    navigation_timeout: Duration,
    idle: IdleConfig,
    results: Mutex<BTreeMap<String, BrowserTest>>,
}

impl CompatibilityCheck {
    pub fn new(
        target: &str,
        identities: Vec<BrowserIdentity>,
        navigation_timeout: Duration,
        idle: IdleConfig,
    ) -> Self {
        Self {
            target: target.to_string(),
            identities,
            navigation_timeout,
            idle,
            results: Mutex::new(BTreeMap::new()),
        }
    }

    /// Latest result per identity label
    pub fn results(&self) -> BTreeMap<String, BrowserTest> {
        match self.results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn test_identity(&self, browser: &dyn Browser, identity: &BrowserIdentity) -> BrowserTest {
        let mut test = BrowserTest::new(identity);
        let page = match browser.new_page(&identity.user_agent).await {
            Ok(page) => page,
            Err(e) => {
                ::log::error!("Error testing {}: {}", identity.label(), e);
                test.error = Some(e.to_string());
                return test;
            }
        };

        match self.probe(page.as_ref()).await {
            Ok(features) => test.features = features,
            Err(e) => {
                ::log::error!("Error testing {}: {}", identity.label(), e);
                test.error = Some(e.to_string());
            }
        }
        if let Err(e) = page.close().await {
            ::log::warn!("Error closing page for {}: {}", identity.label(), e);
        }
        test
    }

    async fn probe(&self, page: &dyn Page) -> Result<BTreeMap<String, bool>, BrowserError> {
        page.goto(&self.target, self.navigation_timeout).await?;
        wait_for_idle(page, &self.idle).await;

        let value = page.evaluate(scripts::FEATURE_PROBES).await?;
        let mut features: BTreeMap<String, bool> = serde_json::from_value(value)?;

        let functional = match self.functional(page).await {
            Ok(functional) => functional,
            Err(e) => {
                ::log::warn!("Error testing site functionality: {}", e);
                [false; 4]
            }
        };
        for (feature, supported) in FUNCTIONAL_FEATURES.iter().zip(functional) {
            features.insert(feature.to_string(), supported);
        }
        Ok(features)
    }

    /// Navigation, forms, animations and responsive layout, in that order
    async fn functional(&self, page: &dyn Page) -> Result<[bool; 4], BrowserError> {
        let before = page.current_url().await?;
        page.click_first_link().await?;
        let navigation = self.wait_for_navigation(page, &before).await?;
        if navigation {
            wait_for_idle(page, &self.idle).await;
        } else {
            ::log::warn!("Clicking the first link on {} did not navigate", before);
        }

        let forms = as_bool(page.evaluate(scripts::FORM_PROBE).await?);
        let animations = as_bool(page.evaluate(scripts::ANIMATION_PROBE).await?);

        page.set_viewport(scripts::MOBILE_WIDTH, scripts::MOBILE_HEIGHT).await?;
        let width = page.evaluate(scripts::VIEWPORT_WIDTH).await?;
        let responsive = width.as_u64() == Some(u64::from(scripts::MOBILE_WIDTH));

        Ok([navigation, forms, animations, responsive])
    }

    /// Polls until another document is loaded, giving up after the navigation timeout
    async fn wait_for_navigation(&self, page: &dyn Page, before: &str) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + self.navigation_timeout;
        loop {
            let current = page.current_url().await?;
            if document(&current) != document(before) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(NAVIGATION_POLL).await;
        }
    }
}

/// URL without its fragment; in-page anchors do not load a new document
fn document(url: &str) -> &str {
    url.split_once('#').map_or(url, |(doc, _)| doc)
}

fn as_bool(value: serde_json::Value) -> bool {
    value.as_bool().unwrap_or(false)
}

#[async_trait]
impl Check for CompatibilityCheck {
    type Report = CompatibilityReport;

    fn name(&self) -> &str {
        "compatibility checker"
    }

    fn kind(&self) -> &'static str {
        "compatibility"
    }

    async fn run(&self, browser: &dyn Browser) -> CompatibilityReport {
        let tests = join_all(
            self.identities
                .iter()
                .map(|identity| self.test_identity(browser, identity)),
        )
        .await;

        let mut results = match self.results.lock() {
            Ok(results) => results,
            Err(poisoned) => poisoned.into_inner(),
        };
        for test in tests {
            results.insert(test.label(), test);
        }
        CompatibilityReport::from_results(&results)
    }

    /// Unhealthy only when no identity could be probed
    fn failure(&self, report: &CompatibilityReport) -> Option<String> {
        let all_failed =
            !report.browsers.is_empty() && report.browsers.iter().all(|b| b.error.is_some());
        all_failed.then(|| report.issues.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CompatibilityChecker, PeriodicChecker};
    use crate::config::CompatibilityConfig;
    use crate::testing::{FEATURES, FakeBrowser, FakeLauncher, FakeSite, SitePage};
    use std::collections::HashMap;
    use std::sync::Arc;

    const TARGET: &str = "https://href.lol/";

    fn site() -> FakeSite {
        FakeSite::new().page(TARGET, SitePage::new().links(&["/about"]))
    }

    fn check() -> CompatibilityCheck {
        CompatibilityCheck::new(
            TARGET,
            CompatibilityConfig::default().identities,
            Duration::from_secs(1),
            IdleConfig {
                quiet_window_ms: 0,
                max_wait_ms: 0,
            },
        )
    }

    fn firefox_agent() -> String {
        CompatibilityConfig::default()
            .identities
            .into_iter()
            .find(|i| i.name == "Firefox")
            .unwrap()
            .user_agent
    }

    #[tokio::test]
    async fn test_all_supported() {
        let report = check().run(&FakeBrowser::new(site())).await;

        assert_eq!(report.total_browsers, 4);
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert!(report.recommendations.is_empty());
        assert!(report.compatibility.values().all(|p| *p == 100.0));
        for browser in &report.browsers {
            assert_eq!(browser.features.len(), FEATURES.len() + FUNCTIONAL_FEATURES.len());
        }
    }

    #[tokio::test]
    async fn test_one_identity_missing_fetch() {
        let browser = FakeBrowser::new(site()).unsupported(&firefox_agent(), "fetch");
        let report = check().run(&browser).await;

        assert_eq!(report.issues, vec!["Firefox latest: fetch not supported".to_string()]);
        assert!(report.compatibility["Firefox latest"] < 100.0);
        assert_eq!(report.compatibility["Chrome latest"], 100.0);
        assert_eq!(report.recommendations.len(), 3);
        assert_eq!(report.status(), "issues");
    }

    #[tokio::test]
    async fn test_failing_identity_does_not_stop_others() {
        let browser = FakeBrowser::new(site()).failing_agent(&firefox_agent());
        let check = check();
        let report = check.run(&browser).await;

        assert_eq!(report.total_browsers, 4);
        assert_eq!(report.compatibility["Firefox latest"], 0.0);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("Firefox latest: check failed: "));
        for label in ["Chrome latest", "Safari latest", "Edge latest"] {
            assert_eq!(report.compatibility[label], 100.0);
        }
        assert!(check.failure(&report).is_none());
        assert_eq!(browser.open_pages(), 0);
    }

    #[tokio::test]
    async fn test_functional_failure_marks_all_functional_features_false() {
        let browser = FakeBrowser::new(site()).broken_navigation_for(&firefox_agent());
        let report = check().run(&browser).await;

        let firefox = report
            .browsers
            .iter()
            .find(|b| b.name == "Firefox")
            .unwrap();
        for feature in FUNCTIONAL_FEATURES {
            assert!(!firefox.features[feature]);
        }
        assert!(firefox.features["fetch"]);
        assert_eq!(report.issues.len(), 4);
        let expected = 10.0 / 14.0 * 100.0;
        assert!((report.compatibility["Firefox latest"] - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_click_that_stays_on_the_page_is_not_navigation() {
        let site = FakeSite::new().page(TARGET, SitePage::new().links(&["#top"]));
        let browser = FakeBrowser::new(site);
        let check = CompatibilityCheck::new(
            TARGET,
            CompatibilityConfig::default().identities,
            Duration::from_millis(200),
            IdleConfig {
                quiet_window_ms: 0,
                max_wait_ms: 0,
            },
        );
        let report = check.run(&browser).await;

        for test in &report.browsers {
            assert!(!test.features["navigation"], "{}", test.label());
            assert!(test.features["forms"]);
            assert!(test.features["responsive"]);
        }
        assert_eq!(report.issues.len(), 4);
        assert!(report.issues.contains(&"Chrome latest: navigation not supported".to_string()));
        assert_eq!(browser.visits(), HashMap::from([(TARGET.to_string(), 4)]));
    }

    #[tokio::test]
    async fn test_click_loads_the_linked_page() {
        let site = FakeSite::new()
            .page(TARGET, SitePage::new().links(&["/about"]))
            .page("https://href.lol/about", SitePage::new());
        let browser = FakeBrowser::new(site);
        let report = check().run(&browser).await;

        assert!(report.browsers.iter().all(|b| b.features["navigation"]));
        assert_eq!(browser.visits()["https://href.lol/about"], 4);
    }

    #[tokio::test]
    async fn test_results_are_kept_per_identity() {
        let check = check();
        check.run(&FakeBrowser::new(site())).await;

        let results = check.results();
        assert_eq!(
            results.keys().cloned().collect::<Vec<_>>(),
            vec!["Chrome latest", "Edge latest", "Firefox latest", "Safari latest"]
        );
    }

    #[tokio::test]
    async fn test_checker_with_closed_browser_reports_failures() {
        let browser = Arc::new(FakeBrowser::new(site()));
        let checker: CompatibilityChecker = PeriodicChecker::new(
            check(),
            Arc::new(FakeLauncher::new(Arc::clone(&browser))),
            Duration::from_secs(3600),
        );
        checker.start().await.unwrap();
        assert!(checker.latest().unwrap().issues.is_empty());
        checker.stop().await;

        let report = checker.check().run(browser.as_ref()).await;
        assert_eq!(report.issues.len(), 4);
        assert!(checker.check().failure(&report).is_some());
    }
}
