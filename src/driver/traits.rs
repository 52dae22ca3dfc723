use crate::driver::web::WebDriverConfig;
use crate::parser::types::{LocatorStrategy, WaitUntil};
use anyhow::Result;
use async_trait::async_trait;

/// Element query understood by every driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// XPath expression
    XPath(String),
    /// Visible text (case-insensitive substring)
    Text(String),
    /// ARIA role with optional accessible name
    Role { role: String, name: Option<String> },
}

impl From<&LocatorStrategy> for Selector {
    fn from(strategy: &LocatorStrategy) -> Self {
        match strategy {
            LocatorStrategy::XPath(x) => Selector::XPath(x.clone()),
            LocatorStrategy::Text(t) => Selector::Text(t.clone()),
            LocatorStrategy::Role { role, name } => Selector::Role {
                role: role.clone(),
                name: name.clone(),
            },
        }
    }
}

/// A frame of the active page, in document order (index 0 is the main frame)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub index: usize,
    pub name: String,
    pub url: String,
}

impl FrameInfo {
    /// Whether a locator's frame filter selects this frame
    pub fn matches(&self, filter: &str) -> bool {
        self.name == filter || self.url.contains(filter)
    }
}

/// Concrete element: the `nth` match of `selector` inside frame `frame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub frame: usize,
    pub selector: Selector,
    pub nth: usize,
}

/// One live browser session: process, context and the active page.
///
/// The active page is always the most recently opened page of the context.
/// Query methods take `&self` and never change what the session points at;
/// only navigation and input dispatch touch the page, and only the teardown
/// methods change the session itself.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Engine name ("chromium", "firefox", "webkit", ...)
    fn browser_name(&self) -> &str;

    /// Load `url` in the active page
    async fn navigate(&self, url: &str, wait_until: WaitUntil, timeout_ms: u64) -> Result<()>;

    /// Frames of the active page in document order
    async fn frames(&self) -> Result<Vec<FrameInfo>>;

    /// Number of elements in `frame` matching `selector`
    async fn count_matches(&self, frame: usize, selector: &Selector) -> Result<usize>;

    /// Rendered and not hidden
    async fn is_visible(&self, element: &ElementRef) -> Result<bool>;

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool>;

    async fn click(&self, element: &ElementRef, timeout_ms: u64) -> Result<()>;

    /// Replace the element's current value with `value`
    async fn fill(&self, element: &ElementRef, value: &str, timeout_ms: u64) -> Result<()>;

    /// Rendered text of the element
    async fn text_content(&self, element: &ElementRef) -> Result<String>;

    /// Scroll the active page's viewport by a relative offset
    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()>;

    /// `document.readyState` of the page and each of its frames
    async fn ready_states(&self) -> Result<Vec<String>>;

    /// Close the browser context
    async fn close_context(&mut self) -> Result<()>;

    /// Close the browser process
    async fn close_browser(&mut self) -> Result<()>;

    /// Stop the automation driver
    async fn stop(&mut self) -> Result<()>;
}

/// Acquires a browser, one context and one page.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &WebDriverConfig) -> Result<Box<dyn BrowserSession>>;
}
