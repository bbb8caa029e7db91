//! Browser session management
//!
//! The archivers only talk to the [`BrowserSession`] and [`PageContext`]
//! traits. [`ChromeSession`] implements them on top of a chromiumoxide
//! controlled Chrome instance; tests substitute a scripted session.

use crate::{create_browser_config, ArchiveError, BrowserSettings};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetScriptExecutionDisabledParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Point in the page lifecycle a navigation waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
}

/// Resource types that can be kept from loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Media,
    Font,
    Stylesheet,
}

impl ResourceKind {
    fn resource_type(self) -> ResourceType {
        match self {
            ResourceKind::Image => ResourceType::Image,
            ResourceKind::Media => ResourceType::Media,
            ResourceKind::Font => ResourceType::Font,
            ResourceKind::Stylesheet => ResourceType::Stylesheet,
        }
    }
}

/// Outcome of a completed navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// Location after redirects
    pub url: String,
    /// HTTP status of the main document, when the browser reported one
    pub status: Option<u16>,
}

impl Navigation {
    pub fn is_success(&self) -> bool {
        match self.status {
            Some(status) => (200..300).contains(&status),
            None => true,
        }
    }
}

/// Supplies isolated page contexts
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageContext>, ArchiveError>;

    async fn close(&self) -> Result<(), ArchiveError>;
}

/// One isolated page, exclusively owned by one archiver
///
/// The DOM helpers have default implementations on top of [`evaluate`],
/// so a browser backend only needs the primitives.
///
/// [`evaluate`]: PageContext::evaluate
#[async_trait]
pub trait PageContext: Send + Sync {
    async fn goto(
        &self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<Navigation, ArchiveError>;

    async fn reload(&self, wait: WaitUntil, timeout: Duration) -> Result<Navigation, ArchiveError>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<Value, ArchiveError>;

    /// Click the element and wait for the navigation it triggers.
    async fn click_and_wait_for_navigation(
        &self,
        selector: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> Result<Navigation, ArchiveError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), ArchiveError>;

    async fn url(&self) -> Result<String, ArchiveError>;

    async fn title(&self) -> Result<String, ArchiveError>;

    async fn set_javascript_enabled(&self, enabled: bool) -> Result<(), ArchiveError>;

    async fn block_resources(&self, kinds: &[ResourceKind]) -> Result<(), ArchiveError>;

    async fn close(&self) -> Result<(), ArchiveError>;

    async fn fill(&self, selector: &str, value: &str) -> Result<(), ArchiveError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.value = {}; return true; }})()",
            js_string(selector),
            js_string(value)
        );
        match self.evaluate(&script).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(ArchiveError::ElementNotFound(selector.to_string())),
        }
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<(), ArchiveError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.checked = {}; return true; }})()",
            js_string(selector),
            checked
        );
        match self.evaluate(&script).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(ArchiveError::ElementNotFound(selector.to_string())),
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, ArchiveError> {
        let script = format!("!!document.querySelector({})", js_string(selector));
        Ok(matches!(self.evaluate(&script).await?, Value::Bool(true)))
    }

    async fn text_content(&self, selector: &str) -> Result<Option<String>, ArchiveError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.textContent : null; }})()",
            js_string(selector)
        );
        Ok(self.evaluate(&script).await?.as_str().map(str::to_string))
    }

    async fn href(&self, selector: &str) -> Result<Option<String>, ArchiveError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.href : null; }})()",
            js_string(selector)
        );
        Ok(self.evaluate(&script).await?.as_str().map(str::to_string))
    }

    async fn body_html(&self) -> Result<String, ArchiveError> {
        let html = self
            .evaluate("document.body ? document.body.innerHTML : ''")
            .await?;
        Ok(html.as_str().unwrap_or_default().to_string())
    }
}

/// Quote a value as a JavaScript string literal.
fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// Chrome driven over the DevTools protocol
///
/// Chrome is started on the first [`BrowserSession::new_page`] call, so a run
/// that never opens a page never launches a browser.
pub struct ChromeSession {
    settings: BrowserSettings,
    debug: bool,
    running: OnceCell<RunningBrowser>,
}

struct RunningBrowser {
    browser: Mutex<Browser>,
    /// Background task handling Chrome DevTools Protocol communication
    handler: JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
}

impl RunningBrowser {
    async fn launch(settings: &BrowserSettings, debug: bool) -> Result<Self, ArchiveError> {
        let config = create_browser_config(settings, debug)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ArchiveError::BrowserLaunchFailed(e.to_string()))?;

        // The handler implements Stream and must be polled for the browser to make progress
        let handler = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Handler error: {}", e);
                        return Err(e);
                    }
                    None => {
                        debug!("Handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        let headless = settings.headless && !debug;
        info!("Browser launched (headless: {})", headless);

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
        })
    }
}

impl ChromeSession {
    pub fn new(settings: BrowserSettings, debug: bool) -> Self {
        Self {
            settings,
            debug,
            running: OnceCell::new(),
        }
    }

    /// Start Chrome right away instead of on the first page.
    pub async fn launch(settings: &BrowserSettings, debug: bool) -> Result<Self, ArchiveError> {
        let session = Self::new(settings.clone(), debug);
        session.running().await?;
        Ok(session)
    }

    pub fn is_running(&self) -> bool {
        self.running.initialized()
    }

    async fn running(&self) -> Result<&RunningBrowser, ArchiveError> {
        self.running
            .get_or_try_init(|| RunningBrowser::launch(&self.settings, self.debug))
            .await
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn new_page(&self) -> Result<Box<dyn PageContext>, ArchiveError> {
        let running = self.running().await?;
        if running.handler.is_finished() {
            return Err(ArchiveError::BrowserLaunchFailed(
                "browser connection is closed".to_string(),
            ));
        }

        let page = running.browser.lock().await.new_page("about:blank").await?;

        Ok(Box::new(ChromePage {
            page,
            interception: Mutex::new(None),
        }))
    }

    async fn close(&self) -> Result<(), ArchiveError> {
        let Some(running) = self.running.get() else {
            return Ok(());
        };

        let result = running.browser.lock().await.close().await;
        running.handler.abort();
        result?;
        info!("Browser closed");
        Ok(())
    }
}

struct ChromePage {
    page: Page,
    interception: Mutex<Option<JoinHandle<()>>>,
}

impl ChromePage {
    async fn wait_for_dom_content_loaded(&self) -> Result<(), ArchiveError> {
        loop {
            let state = self.evaluate("document.readyState").await?;
            if state.as_str().is_some_and(|state| state != "loading") {
                return Ok(());
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn navigate(&self, url: &str, wait: WaitUntil) -> Result<(), ArchiveError> {
        match wait {
            WaitUntil::Load => {
                self.page
                    .goto(url)
                    .await
                    .map_err(|e| ArchiveError::Navigation(e.to_string()))?;
            }
            WaitUntil::DomContentLoaded => {
                let response = self
                    .page
                    .execute(NavigateParams::new(url))
                    .await
                    .map_err(|e| ArchiveError::Navigation(e.to_string()))?;
                navigation_outcome(url, response.result.error_text.as_deref())?;
                self.wait_for_dom_content_loaded().await?;
            }
        }
        Ok(())
    }

    async fn finish_navigation(
        &self,
        responses: Option<EventStream<EventResponseReceived>>,
    ) -> Result<Navigation, ArchiveError> {
        let status = match responses {
            Some(responses) => document_status(responses).await,
            None => None,
        };

        Ok(Navigation {
            url: self.url().await?,
            status,
        })
    }

    async fn response_listener(&self) -> Option<EventStream<EventResponseReceived>> {
        match self.page.event_listener::<EventResponseReceived>().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Failed to subscribe to ResponseReceived events: {}", e);
                None
            }
        }
    }
}

/// Chrome reports network failures (DNS, refused connections, blocked
/// requests) in the navigate result and then renders its own error page.
fn navigation_outcome(url: &str, error_text: Option<&str>) -> Result<(), ArchiveError> {
    match error_text {
        Some(error_text) if !error_text.is_empty() => Err(ArchiveError::Navigation(format!(
            "{url}: {error_text}"
        ))),
        _ => Ok(()),
    }
}

/// Status of the first main-document response already buffered on the stream.
async fn document_status(mut responses: EventStream<EventResponseReceived>) -> Option<u16> {
    while let Ok(Some(event)) = timeout(Duration::from_millis(250), responses.next()).await {
        if event.r#type == ResourceType::Document {
            return Some(event.response.status as u16);
        }
    }
    None
}

#[async_trait]
impl PageContext for ChromePage {
    async fn goto(
        &self,
        url: &str,
        wait: WaitUntil,
        limit: Duration,
    ) -> Result<Navigation, ArchiveError> {
        let responses = self.response_listener().await;

        timeout(limit, self.navigate(url, wait))
            .await
            .map_err(|_| ArchiveError::Timeout(limit))??;

        self.finish_navigation(responses).await
    }

    async fn reload(&self, wait: WaitUntil, limit: Duration) -> Result<Navigation, ArchiveError> {
        let responses = self.response_listener().await;

        let reload = async {
            self.page
                .reload()
                .await
                .map_err(|e| ArchiveError::Navigation(e.to_string()))?;
            if wait == WaitUntil::DomContentLoaded {
                self.wait_for_dom_content_loaded().await?;
            }
            Ok::<(), ArchiveError>(())
        };

        timeout(limit, reload)
            .await
            .map_err(|_| ArchiveError::Timeout(limit))??;

        self.finish_navigation(responses).await
    }

    async fn evaluate(&self, script: &str) -> Result<Value, ArchiveError> {
        let result = self.page.evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn click_and_wait_for_navigation(
        &self,
        selector: &str,
        wait: WaitUntil,
        limit: Duration,
    ) -> Result<Navigation, ArchiveError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| ArchiveError::ElementNotFound(format!("{selector}: {e}")))?;
        let responses = self.response_listener().await;

        let navigation = async {
            element
                .click()
                .await
                .map_err(|e| ArchiveError::Navigation(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| ArchiveError::Navigation(e.to_string()))?;
            if wait == WaitUntil::DomContentLoaded {
                self.wait_for_dom_content_loaded().await?;
            }
            Ok::<(), ArchiveError>(())
        };

        timeout(limit, navigation)
            .await
            .map_err(|_| ArchiveError::Timeout(limit))??;

        self.finish_navigation(responses).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        limit: Duration,
    ) -> Result<(), ArchiveError> {
        let deadline = Instant::now() + limit;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ArchiveError::ElementNotFound(selector.to_string()));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn url(&self) -> Result<String, ArchiveError> {
        Ok(self
            .page
            .url()
            .await?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn title(&self) -> Result<String, ArchiveError> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn set_javascript_enabled(&self, enabled: bool) -> Result<(), ArchiveError> {
        self.page
            .execute(SetScriptExecutionDisabledParams::new(!enabled))
            .await?;
        Ok(())
    }

    async fn block_resources(&self, kinds: &[ResourceKind]) -> Result<(), ArchiveError> {
        let patterns: Vec<RequestPattern> = kinds
            .iter()
            .map(|kind| {
                RequestPattern::builder()
                    .resource_type(kind.resource_type())
                    .request_stage(RequestStage::Request)
                    .build()
            })
            .collect();

        let mut paused = self.page.event_listener::<EventRequestPaused>().await?;
        self.page
            .execute(FetchEnableParams::builder().patterns(patterns).build())
            .await?;

        let page = self.page.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let blocked =
                    FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
                if let Err(e) = page.execute(blocked).await {
                    debug!("Failed to block {}: {}", event.request.url, e);
                }
            }
        });

        if let Some(previous) = self.interception.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ArchiveError> {
        if let Some(task) = self.interception.lock().await.take() {
            task.abort();
        }
        self.page.clone().close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_quotes_and_escapes() {
        assert_eq!(js_string("#url"), "\"#url\"");
        assert_eq!(
            js_string(r#"input[type="submit"]"#),
            r#""input[type=\"submit\"]""#
        );
    }

    #[test]
    fn test_navigation_success() {
        let ok = Navigation {
            url: "https://web.archive.org/save".to_string(),
            status: Some(200),
        };
        assert!(ok.is_success());

        let limited = Navigation {
            status: Some(429),
            ..ok.clone()
        };
        assert!(!limited.is_success());

        let unknown = Navigation { status: None, ..ok };
        assert!(unknown.is_success());
    }

    #[test]
    fn test_navigation_error_text_fails_navigation() {
        assert!(navigation_outcome("https://archive.today", None).is_ok());
        assert!(navigation_outcome("https://archive.today", Some("")).is_ok());

        match navigation_outcome("https://archive.today", Some("net::ERR_NAME_NOT_RESOLVED")) {
            Err(ArchiveError::Navigation(message)) => {
                assert_eq!(message, "https://archive.today: net::ERR_NAME_NOT_RESOLVED")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_launches_lazily() {
        let session = ChromeSession::new(BrowserSettings::default(), false);
        assert!(!session.is_running());

        // Nothing was started, so there is nothing to close
        session.close().await.unwrap();
        assert!(!session.is_running());
    }
}
