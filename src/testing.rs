//! In-process browser fakes serving a scripted site graph.

use crate::browser::{Browser, BrowserLauncher, Navigation, Page, scripts};
use crate::config::IdleConfig;
use crate::error::BrowserError;
use crate::inspector::InspectOptions;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub(crate) const FEATURES: [&str; 10] = [
    "flexbox",
    "grid",
    "cssVariables",
    "fetch",
    "promises",
    "asyncAwait",
    "webp",
    "webgl",
    "serviceWorker",
    "pushApi",
];

pub(crate) fn fast_options() -> InspectOptions {
    InspectOptions {
        user_agent: "test-agent".to_string(),
        navigation_timeout: Duration::from_secs(1),
        idle: IdleConfig {
            quiet_window_ms: 0,
            max_wait_ms: 0,
        },
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SitePage {
    status: Option<u16>,
    title: String,
    description: String,
    h1: u32,
    images: u32,
    links: Vec<String>,
    fcp: Option<f64>,
    fail_navigation: bool,
    delay: Duration,
}

impl SitePage {
    pub(crate) fn new() -> Self {
        Self {
            status: Some(200),
            title: String::new(),
            description: String::new(),
            h1: 0,
            images: 0,
            links: Vec::new(),
            fcp: Some(100.0),
            fail_navigation: false,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub(crate) fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub(crate) fn h1(mut self, count: u32) -> Self {
        self.h1 = count;
        self
    }

    pub(crate) fn images(mut self, count: u32) -> Self {
        self.images = count;
        self
    }

    pub(crate) fn links(mut self, links: &[&str]) -> Self {
        self.links = links.iter().map(|l| l.to_string()).collect();
        self
    }

    pub(crate) fn fcp(mut self, ms: f64) -> Self {
        self.fcp = Some(ms);
        self
    }

    pub(crate) fn without_paint_timings(mut self) -> Self {
        self.fcp = None;
        self
    }

    pub(crate) fn fail_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub(crate) fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    fn html(&self) -> String {
        let mut body = String::new();
        for i in 0..self.h1 {
            body.push_str(&format!("<h1>Heading {}</h1>", i));
        }
        for i in 0..self.images {
            body.push_str(&format!(r#"<img src="/img/{}.png">"#, i));
        }
        for link in &self.links {
            body.push_str(&format!(r#"<a href="{}">link</a>"#, link));
        }
        format!(
            r#"<html><head><title>{}</title><meta name="description" content="{}"></head><body>{}</body></html>"#,
            self.title, self.description, body
        )
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeSite {
    pages: HashMap<String, SitePage>,
}

impl FakeSite {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(mut self, url: &str, page: SitePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }
}

#[derive(Debug, Default)]
struct Stats {
    opened: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    visits: Mutex<HashMap<String, usize>>,
}

/// Browser serving a [`FakeSite`], recording what it was asked to do
#[derive(Debug)]
pub(crate) struct FakeBrowser {
    site: Arc<FakeSite>,
    stats: Arc<Stats>,
    closed: AtomicBool,
    fail_page_close: bool,
    fail_close: bool,
    unsupported: HashMap<String, HashSet<String>>,
    failing_agents: HashSet<String>,
    broken_functional_agents: HashSet<String>,
}

impl FakeBrowser {
    pub(crate) fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            stats: Arc::new(Stats::default()),
            closed: AtomicBool::new(false),
            fail_page_close: false,
            fail_close: false,
            unsupported: HashMap::new(),
            failing_agents: HashSet::new(),
            broken_functional_agents: HashSet::new(),
        }
    }

    pub(crate) fn failing_page_close(mut self) -> Self {
        self.fail_page_close = true;
        self
    }

    pub(crate) fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Make `feature` probe false for pages opened with `user_agent`
    pub(crate) fn unsupported(mut self, user_agent: &str, feature: &str) -> Self {
        self.unsupported
            .entry(user_agent.to_string())
            .or_default()
            .insert(feature.to_string());
        self
    }

    /// Navigation fails for pages opened with `user_agent`
    pub(crate) fn failing_agent(mut self, user_agent: &str) -> Self {
        self.failing_agents.insert(user_agent.to_string());
        self
    }

    /// Clicking a link throws for pages opened with `user_agent`
    pub(crate) fn broken_navigation_for(mut self, user_agent: &str) -> Self {
        self.broken_functional_agents.insert(user_agent.to_string());
        self
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn pages_opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn open_pages(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_open_pages(&self) -> usize {
        self.stats.peak_open.load(Ordering::SeqCst)
    }

    /// Navigation count per URL
    pub(crate) fn visits(&self) -> HashMap<String, usize> {
        self.stats.visits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&self, user_agent: &str) -> Result<Box<dyn Page>, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::Closed);
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_open.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(FakePage {
            site: Arc::clone(&self.site),
            stats: Arc::clone(&self.stats),
            current: Mutex::new(None),
            viewport: Mutex::new((1280, 800)),
            fail_close: self.fail_page_close,
            unsupported: self
                .unsupported
                .get(user_agent)
                .cloned()
                .unwrap_or_default(),
            fail_navigation: self.failing_agents.contains(user_agent),
            broken_click: self.broken_functional_agents.contains(user_agent),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(BrowserError::Command("browser already gone".to_string()));
        }
        Ok(())
    }
}

struct FakePage {
    site: Arc<FakeSite>,
    stats: Arc<Stats>,
    current: Mutex<Option<String>>,
    viewport: Mutex<(u32, u32)>,
    fail_close: bool,
    unsupported: HashSet<String>,
    fail_navigation: bool,
    broken_click: bool,
}

impl FakePage {
    fn current_page(&self) -> Option<SitePage> {
        let current = self.current.lock().unwrap().clone()?;
        self.site.pages.get(document(&current)).cloned()
    }

    fn record_visit(&self, url: &str) {
        *self
            .stats
            .visits
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
    }
}

fn document(url: &str) -> &str {
    url.split_once('#').map_or(url, |(doc, _)| doc)
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation, BrowserError> {
        self.record_visit(url);

        if self.fail_navigation {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }

        let Some(page) = self.site.pages.get(url).cloned() else {
            return Err(BrowserError::NoResponse(url.to_string()));
        };
        if !page.delay.is_zero() {
            tokio::time::sleep(page.delay).await;
        }
        if page.fail_navigation {
            return Err(BrowserError::Timeout {
                url: url.to_string(),
                timeout,
            });
        }

        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(Navigation {
            status: page.status,
        })
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .current
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.current_page().map(|p| p.html()).unwrap_or_default())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let page = self.current_page();
        if script == scripts::READINESS {
            return Ok(json!({ "complete": true, "resources": 3 }));
        }
        if script == scripts::PAINT_TIMINGS {
            return Ok(match page.and_then(|p| p.fcp) {
                Some(fcp) => json!({
                    "firstContentfulPaint": fcp,
                    "largestContentfulPaint": fcp + 50.0,
                    "timeToInteractive": fcp + 200.0,
                }),
                None => json!({ "timeToInteractive": 42.0 }),
            });
        }
        if script == scripts::FEATURE_PROBES {
            let features: BTreeMap<String, bool> = FEATURES
                .iter()
                .map(|f| (f.to_string(), !self.unsupported.contains(*f)))
                .collect();
            return Ok(serde_json::to_value(features)?);
        }
        if script == scripts::FORM_PROBE {
            return Ok(json!(!self.unsupported.contains("forms")));
        }
        if script == scripts::ANIMATION_PROBE {
            return Ok(json!(!self.unsupported.contains("animations")));
        }
        if script == scripts::VIEWPORT_WIDTH {
            return Ok(json!(self.viewport.lock().unwrap().0));
        }
        Err(BrowserError::Evaluation("unknown script".to_string()))
    }

    async fn click_first_link(&self) -> Result<(), BrowserError> {
        if self.broken_click {
            return Err(BrowserError::Command("element click intercepted".to_string()));
        }
        let current = self.current_url().await?;
        let Some(href) = self.current_page().and_then(|p| p.links.first().cloned()) else {
            return Err(BrowserError::Command("no such element: a[href]".to_string()));
        };
        let target = Url::parse(&current)
            .and_then(|base| base.join(&href))
            .map_err(|e| BrowserError::Command(e.to_string()))?
            .to_string();
        if document(&target) != document(&current) {
            self.record_visit(document(&target));
        }
        *self.current.lock().unwrap() = Some(target);
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), BrowserError> {
        *self.viewport.lock().unwrap() = (width, height);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.stats.open.fetch_sub(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(BrowserError::Command("target closed".to_string()));
        }
        Ok(())
    }
}

/// Launcher handing out one shared [`FakeBrowser`]
pub(crate) struct FakeLauncher {
    browser: Option<Arc<FakeBrowser>>,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub(crate) fn new(browser: Arc<FakeBrowser>) -> Self {
        Self {
            browser: Some(browser),
            launches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            browser: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match &self.browser {
            Some(browser) => {
                browser.closed.store(false, Ordering::SeqCst);
                Ok(Arc::clone(browser) as Arc<dyn Browser>)
            }
            None => Err(BrowserError::Launch("chrome not found".to_string())),
        }
    }
}
