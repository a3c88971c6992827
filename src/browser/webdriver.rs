use super::{Browser, BrowserLauncher, Navigation, Page, scripts};
use crate::config::WebDriverConfig;
use crate::error::BrowserError;
use async_trait::async_trait;
use fantoccini::error::{CmdError, ErrorStatus};
use fantoccini::wd::{Capabilities, TimeoutConfiguration};
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Extra time granted on top of the WebDriver page-load timeout before the
/// navigation is abandoned locally.
const NAVIGATION_GRACE: Duration = Duration::from_secs(5);

/// Launches browsers through a WebDriver server (chromedriver, selenium, ...)
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    config: WebDriverConfig,
}

impl WebDriverLauncher {
    pub fn new(config: WebDriverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, BrowserError> {
        let caps = capabilities(&self.config, None);
        let (endpoint, control) = connect_to_webdriver(&self.config, caps).await?;
        ::log::info!("Browser launched through WebDriver at {}", endpoint);
        Ok(Arc::new(WebDriverBrowser {
            endpoint,
            config: self.config.clone(),
            control: Mutex::new(Some(control)),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A browser hosted by a WebDriver server. The launch session keeps the
/// browser claimed; every page is its own session so pages never share state.
pub struct WebDriverBrowser {
    endpoint: String,
    config: WebDriverConfig,
    control: Mutex<Option<Client>>,
    closed: AtomicBool,
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn new_page(&self, user_agent: &str) -> Result<Box<dyn Page>, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let caps = capabilities(&self.config, Some(user_agent));
        let client = new_session(&self.endpoint, caps)
            .await
            .map_err(|e| BrowserError::Command(e.to_string()))?;
        Ok(Box::new(WebDriverPage { client }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        let control = self.control.lock().await.take();
        if let Some(client) = control {
            client.close().await?;
            ::log::debug!("Closed WebDriver session at {}", self.endpoint);
        }
        Ok(())
    }
}

struct WebDriverPage {
    client: Client,
}

#[async_trait]
impl Page for WebDriverPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation, BrowserError> {
        self.client
            .update_timeouts(TimeoutConfiguration::new(
                Some(timeout),
                Some(timeout),
                None,
            ))
            .await?;

        match tokio::time::timeout(timeout + NAVIGATION_GRACE, self.client.goto(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(navigation_error(url, timeout, e)),
            Err(_) => {
                return Err(BrowserError::Timeout {
                    url: url.to_string(),
                    timeout,
                });
            }
        }

        // Chromium lands on its own error document when no response arrived
        let landed = self.client.current_url().await?;
        if landed.scheme() == "chrome-error" || landed.as_str() == "about:blank" {
            return Err(BrowserError::NoResponse(url.to_string()));
        }

        let status = self
            .client
            .execute(scripts::NAVIGATION_STATUS, vec![])
            .await?
            .as_u64()
            .filter(|s| *s > 0)
            .and_then(|s| u16::try_from(s).ok());

        Ok(Navigation { status })
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.client.source().await?)
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        self.client
            .execute(script, vec![])
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))
    }

    async fn click_first_link(&self) -> Result<(), BrowserError> {
        let link = self.client.find(Locator::Css("a[href]")).await?;
        link.click().await?;
        Ok(())
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), BrowserError> {
        // WebDriver sizes the outer window, so add the browser chrome back on
        let chrome = self.evaluate(scripts::WINDOW_CHROME).await?;
        let (dw, dh): (u32, u32) = serde_json::from_value(chrome)?;
        self.client
            .set_window_size(width + dw, height + dh)
            .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        let WebDriverPage { client } = *self;
        client.close().await?;
        Ok(())
    }
}

/// A page-load timeout reported by the driver is a timeout; anything else is a failed navigation
fn navigation_error(url: &str, timeout: Duration, error: CmdError) -> BrowserError {
    match error {
        CmdError::Standard(wd) if wd.error == ErrorStatus::Timeout => BrowserError::Timeout {
            url: url.to_string(),
            timeout,
        },
        other => BrowserError::Navigation {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

/// Session capabilities for a Chromium-based browser, optionally presenting a user agent
fn capabilities(config: &WebDriverConfig, user_agent: Option<&str>) -> Capabilities {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    if let Some(ua) = user_agent {
        args.push(format!("--user-agent={}", ua));
    }
    args.extend(config.extra_args.iter().cloned());

    let mut caps = Capabilities::new();
    caps.insert("acceptInsecureCerts".to_string(), json!(true));
    caps.insert("pageLoadStrategy".to_string(), json!("normal"));
    caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
    caps
}

async fn new_session(
    endpoint: &str,
    caps: Capabilities,
) -> Result<Client, fantoccini::error::NewSessionError> {
    let mut builder = ClientBuilder::native();
    builder.capabilities(caps);
    builder.connect(endpoint).await
}

/// Connects to the configured WebDriver endpoint, falling back to the
/// alternatives when it refuses. Returns the endpoint that answered.
async fn connect_to_webdriver(
    config: &WebDriverConfig,
    caps: Capabilities,
) -> Result<(String, Client), BrowserError> {
    match new_session(&config.url, caps.clone()).await {
        Ok(client) => return Ok((config.url.clone(), client)),
        Err(e) => {
            ::log::error!("Failed to connect to WebDriver at {}: {}", config.url, e);
        }
    }

    for url in &config.fallback_urls {
        if *url == config.url {
            continue;
        }

        ::log::info!("Trying fallback WebDriver URL: {}", url);
        if let Ok(client) = new_session(url, caps.clone()).await {
            return Ok((url.clone(), client));
        }
    }

    Err(BrowserError::Launch(format!(
        "no WebDriver server answered at {} (set WEBDRIVER_URL or start chromedriver)",
        config.url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_carry_user_agent_and_sandbox_flags() {
        let config = WebDriverConfig::default();
        let caps = capabilities(&config, Some("HrefBot/1.0"));
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        let args: Vec<&str> = args.iter().filter_map(|a| a.as_str()).collect();
        assert!(args.contains(&"--no-sandbox"));
        assert!(args.contains(&"--disable-setuid-sandbox"));
        assert!(args.contains(&"--headless=new"));
        assert!(args.contains(&"--user-agent=HrefBot/1.0"));
        assert_eq!(caps["acceptInsecureCerts"], json!(true));
    }

    #[test]
    fn test_page_load_timeout_status_maps_to_timeout() {
        let error = CmdError::Standard(fantoccini::error::WebDriver::new(
            ErrorStatus::Timeout,
            "Timed out receiving message from renderer: 29.5",
        ));
        let err = navigation_error("https://href.lol/", Duration::from_secs(30), error);
        assert!(matches!(err, BrowserError::Timeout { timeout, .. } if timeout == Duration::from_secs(30)));
    }

    #[test]
    fn test_timeout_wording_without_timeout_status_is_a_navigation_failure() {
        let error = CmdError::Standard(fantoccini::error::WebDriver::new(
            ErrorStatus::UnknownError,
            "net::ERR_CONNECTION_TIMED_OUT (timeout)",
        ));
        let err = navigation_error("https://href.lol/", Duration::from_secs(30), error);
        assert!(matches!(err, BrowserError::Navigation { ref url, .. } if url == "https://href.lol/"));
    }

    #[test]
    fn test_headful_capabilities() {
        let config = WebDriverConfig {
            headless: false,
            extra_args: vec!["--lang=en".to_string()],
            ..WebDriverConfig::default()
        };
        let caps = capabilities(&config, None);
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
        assert!(args.iter().any(|a| a == "--lang=en"));
        assert!(!args.iter().any(|a| a.as_str().unwrap_or("").starts_with("--user-agent")));
    }
}
