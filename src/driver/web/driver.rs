//! Web Driver implementation using Playwright
//!
//! One `WebDriver` owns the Playwright driver process, one browser, one
//! context and the pages opened in it. Element lookups always go through the
//! most recently opened page.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use playwright::api::{Browser, BrowserContext, DocumentLoadState, ElementHandle, Frame, Page, Viewport};
use playwright::Playwright;
use std::future::Future;
use std::path::PathBuf;

use crate::driver::traits::{BrowserLauncher, BrowserSession, ElementRef, FrameInfo, Selector};
use crate::parser::types::WaitUntil;

/// Web browser type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrowserType {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "chromium" | "chrome" => Some(BrowserType::Chromium),
            "firefox" => Some(BrowserType::Firefox),
            "webkit" | "safari" => Some(BrowserType::Webkit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserType::Chromium => "chromium",
            BrowserType::Firefox => "firefox",
            BrowserType::Webkit => "webkit",
        }
    }
}

/// Web Driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDriverConfig {
    pub browser_type: BrowserType,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Explicit browser executable (Chromium only)
    pub executable: Option<PathBuf>,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            browser_type: BrowserType::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            executable: None,
        }
    }
}

/// Launches Playwright-backed sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaywrightLauncher;

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, config: &WebDriverConfig) -> Result<Box<dyn BrowserSession>> {
        let driver = WebDriver::new(config.clone()).await?;
        Ok(Box::new(driver))
    }
}

/// Web Driver using Playwright
pub struct WebDriver {
    playwright: Option<Playwright>,
    browser: Option<Browser>,
    context: Option<BrowserContext>,
    config: WebDriverConfig,
}

impl WebDriver {
    /// Start Playwright, launch the browser, open one context and one page.
    /// Anything acquired before a failing stage is released again.
    pub async fn new(config: WebDriverConfig) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;

        let browser = match config.browser_type {
            BrowserType::Chromium => launch_chromium_browser(&playwright, &config).await?,
            BrowserType::Firefox => playwright
                .firefox()
                .launcher()
                .headless(config.headless)
                .launch()
                .await
                .context("Failed to launch Firefox")?,
            BrowserType::Webkit => playwright
                .webkit()
                .launcher()
                .headless(config.headless)
                .launch()
                .await
                .context("Failed to launch WebKit")?,
        };

        let context = or_release(
            browser.context_builder().build().await,
            release(None, &browser),
            "Failed to create browser context",
        )
        .await?;

        let page = or_release(
            context.new_page().await,
            release(Some(&context), &browser),
            "Failed to open page",
        )
        .await?;

        let viewport = Viewport {
            width: config.viewport_width as i32,
            height: config.viewport_height as i32,
        };
        or_release(
            page.set_viewport_size(viewport).await,
            release(Some(&context), &browser),
            "Failed to set viewport size",
        )
        .await?;

        info!(
            "Started {} session (headless: {})",
            config.browser_type.as_str(),
            config.headless
        );

        Ok(Self {
            playwright: Some(playwright),
            browser: Some(browser),
            context: Some(context),
            config,
        })
    }

    fn context(&self) -> Result<&BrowserContext> {
        self.context
            .as_ref()
            .context("Browser context is already closed")
    }

    /// Last opened page wins
    fn active_page(&self) -> Result<Page> {
        let pages = self.context()?.pages()?;
        pages
            .into_iter()
            .last()
            .context("No open page in browser context")
    }

    fn frame(&self, index: usize) -> Result<Frame> {
        let frames = self.active_page()?.frames()?;
        frames
            .into_iter()
            .nth(index)
            .with_context(|| format!("Frame {} is no longer attached", index))
    }

    async fn element(&self, element: &ElementRef) -> Result<ElementHandle> {
        let frame = self.frame(element.frame)?;
        let selector = selector_to_playwright(&element.selector);
        let handles = frame.query_selector_all(&selector).await?;
        handles
            .into_iter()
            .nth(element.nth)
            .with_context(|| format!("Element '{}' (nth={}) is gone", selector, element.nth))
    }
}

#[async_trait]
impl BrowserSession for WebDriver {
    fn browser_name(&self) -> &str {
        self.config.browser_type.as_str()
    }

    async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout_ms: u64) -> Result<()> {
        let page = self.active_page()?;

        match document_load_state(wait_until) {
            // Commit: hand the URL to the page and return once navigation has started
            None => {
                page.evaluate::<&str, ()>("url => { window.location.href = url; }", url)
                    .await
                    .with_context(|| format!("Failed to start navigation to {}", url))?;
            }
            Some(state) => {
                page.goto_builder(url)
                    .wait_until(state)
                    .timeout(timeout_ms as f64)
                    .goto()
                    .await
                    .with_context(|| format!("Failed to navigate to {}", url))?;
            }
        }

        debug!("Navigated to {} ({:?})", url, wait_until);
        Ok(())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>> {
        let frames = self.active_page()?.frames()?;
        let mut infos = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            infos.push(FrameInfo {
                index,
                name: frame.name().unwrap_or_default(),
                url: frame.url().unwrap_or_default(),
            });
        }
        Ok(infos)
    }

    async fn count_matches(&self, frame: usize, selector: &Selector) -> Result<usize> {
        let frame = self.frame(frame)?;
        let handles = frame
            .query_selector_all(&selector_to_playwright(selector))
            .await?;
        Ok(handles.len())
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool> {
        Ok(self.element(element).await?.is_visible().await?)
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool> {
        Ok(self.element(element).await?.is_enabled().await?)
    }

    async fn click(&self, element: &ElementRef, timeout_ms: u64) -> Result<()> {
        let handle = self.element(element).await?;
        handle
            .click_builder()
            .timeout(timeout_ms as f64)
            .click()
            .await
            .context("Click was not delivered")?;
        Ok(())
    }

    async fn fill(&self, element: &ElementRef, value: &str, timeout_ms: u64) -> Result<()> {
        let handle = self.element(element).await?;
        handle
            .fill_builder(value)
            .timeout(timeout_ms as f64)
            .fill()
            .await
            .context("Fill was not delivered")?;
        Ok(())
    }

    async fn text_content(&self, element: &ElementRef) -> Result<String> {
        Ok(self.element(element).await?.inner_text().await?)
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        let page = self.active_page()?;
        let js = format!("window.scrollBy({}, {})", dx, dy);
        page.evaluate::<(), ()>(&js, ()).await?;
        Ok(())
    }

    async fn ready_states(&self) -> Result<Vec<String>> {
        let frames = self.active_page()?.frames()?;
        let mut states = Vec::with_capacity(frames.len());
        for frame in frames {
            let state: String = frame
                .evaluate::<(), String>("() => document.readyState", ())
                .await?;
            states.push(state);
        }
        Ok(states)
    }

    async fn close_context(&mut self) -> Result<()> {
        if let Some(context) = self.context.take() {
            context.close().await.context("Failed to close context")?;
        }
        Ok(())
    }

    async fn close_browser(&mut self) -> Result<()> {
        if let Some(browser) = self.browser.take() {
            browser.close().await.context("Failed to close browser")?;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // Dropping the handle terminates the driver process
        if self.playwright.take().is_some() {
            debug!("Playwright driver stopped");
        }
        Ok(())
    }
}

/// Pass a startup stage's value through, or run `release` and fail with `what`.
/// `release` is only polled on failure.
async fn or_release<T, E, R>(stage: std::result::Result<T, E>, release: R, what: &'static str) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
    R: Future<Output = ()>,
{
    match stage {
        Ok(value) => Ok(value),
        Err(e) => {
            release.await;
            Err(e).context(what)
        }
    }
}

/// Close what a half-started session already holds
async fn release(context: Option<&BrowserContext>, browser: &Browser) {
    if let Some(context) = context {
        if let Err(e) = context.close().await {
            debug!("Closing context after failed startup: {}", e);
        }
    }
    if let Err(e) = browser.close().await {
        debug!("Closing browser after failed startup: {}", e);
    }
}

fn document_load_state(wait_until: WaitUntil) -> Option<DocumentLoadState> {
    match wait_until {
        WaitUntil::Commit => None,
        WaitUntil::DomContentLoaded => Some(DocumentLoadState::DomContentLoaded),
        WaitUntil::Load => Some(DocumentLoadState::Load),
        WaitUntil::NetworkIdle => Some(DocumentLoadState::NetworkIdle),
    }
}

/// Convert Selector to Playwright selector string
pub fn selector_to_playwright(selector: &Selector) -> String {
    match selector {
        Selector::XPath(xpath) => format!("xpath={}", xpath),
        Selector::Text(text) => format!("text={}", text),
        Selector::Role { role, name } => format!("xpath={}", role_to_xpath(role, name.as_deref())),
    }
}

/// XPath for an ARIA role, covering the explicit attribute and common implicit roles
fn role_to_xpath(role: &str, name: Option<&str>) -> String {
    let implicit: &[&str] = match role {
        "button" => &["button"],
        "link" => &["a"],
        "heading" => &["h1", "h2", "h3", "h4", "h5", "h6"],
        "textbox" => &["input", "textarea"],
        "checkbox" => &["input[@type='checkbox']"],
        "list" => &["ul", "ol"],
        "listitem" => &["li"],
        "dialog" => &["dialog"],
        _ => &[],
    };

    let mut alternatives = vec![format!("@role={}", xpath_literal(role))];
    alternatives.extend(implicit.iter().map(|tag| format!("self::{}", tag)));
    let role_pred = alternatives.join(" or ");

    match name {
        Some(n) => {
            let lit = xpath_literal(n);
            format!(
                "//*[({}) and (normalize-space(.)={} or @aria-label={})]",
                role_pred, lit, lit
            )
        }
        None => format!("//*[{}]", role_pred),
    }
}

/// Quote a string as an XPath 1.0 literal
fn xpath_literal(s: &str) -> String {
    if !s.contains('"') {
        format!("\"{}\"", s)
    } else if !s.contains('\'') {
        format!("'{}'", s)
    } else {
        let parts: Vec<String> = s.split('"').map(|p| format!("\"{}\"", p)).collect();
        format!("concat({})", parts.join(", '\"', "))
    }
}

async fn launch_chromium_browser(playwright: &Playwright, config: &WebDriverConfig) -> Result<Browser> {
    let chromium = playwright.chromium();
    let mut launcher = chromium.launcher();
    launcher = launcher.headless(config.headless);

    let env_path = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH")
        .ok()
        .map(PathBuf::from);

    let explicit_path = config.executable.clone().or(env_path);
    let discovered_path = if explicit_path.is_none() { find_system_browser() } else { None };

    if let Some(ref path) = explicit_path {
        info!("Using browser executable: {}", path.display());
        launcher = launcher.executable(path);
    } else if let Some(ref path) = discovered_path {
        info!("Using discovered browser: {}", path.display());
        launcher = launcher.executable(path);
    } else {
        debug!("No browser executable found, relying on Playwright's bundled browser");
    }

    let args: Vec<String> = vec![
        format!("--window-size={},{}", config.viewport_width, config.viewport_height),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--ipc=host".to_string(),
        "--single-process".to_string(),
    ];
    launcher = launcher.args(&args);

    Ok(launcher.launch().await.context("Failed to launch Chromium")?)
}

fn find_system_browser() -> Option<PathBuf> {
    let common_paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    common_paths
        .iter()
        .map(std::path::Path::new)
        .find(|p| p.exists())
        .map(|p| p.to_path_buf())
}
