//! Browser and page abstractions.
//!
//! A [`Browser`] hands out isolated [`Page`]s, each presenting its own user
//! agent. The crawler, the site monitor and the compatibility checker only
//! talk to these traits; [`webdriver`] provides the implementation backed by
//! a WebDriver server.

pub mod scripts;
pub mod webdriver;

use crate::error::BrowserError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use webdriver::{WebDriverBrowser, WebDriverLauncher};

/// Outcome of a navigation that produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Navigation {
    /// HTTP status, when the browser exposes it
    pub status: Option<u16>,
}

/// Starts a browser instance. Launch failure is the only fatal browser error.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Browser>, BrowserError>;
}

/// A running browser instance
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh page presenting `user_agent`. Fails with
    /// [`BrowserError::Closed`] once the browser has been closed.
    async fn new_page(&self, user_agent: &str) -> Result<Box<dyn Page>, BrowserError>;

    /// Shut the browser down. Closing twice is not an error.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// One page (tab/session). Methods take `&self` so independent probes can run
/// concurrently on the same page.
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation, BrowserError>;

    /// URL of the document currently loaded (after redirects)
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Serialized markup of the live DOM
    async fn content(&self) -> Result<String, BrowserError>;

    /// Run a script body (which must `return` its value) and hand back the JSON result
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError>;

    /// Click the first anchor carrying an href
    async fn click_first_link(&self) -> Result<(), BrowserError>;

    /// Resize the layout viewport to `width` x `height` CSS pixels
    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), BrowserError>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}
