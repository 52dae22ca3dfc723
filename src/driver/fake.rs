//! Scripted in-memory browser used by the runner tests.
//!
//! A script is a set of named screens. Each screen holds frames of elements;
//! clicking an element may switch to another screen, and navigating to a URL
//! switches to the screen routed for that URL. Every session action is
//! appended to a log shared with the launcher so tests can inspect it after
//! the session has been torn down.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

use crate::driver::traits::{BrowserLauncher, BrowserSession, ElementRef, FrameInfo, Selector};
use crate::driver::web::WebDriverConfig;
use crate::parser::types::WaitUntil;

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub xpath: Option<String>,
    pub role: Option<String>,
    pub text: String,
    pub hidden: bool,
    pub disabled: bool,
    /// Element is attached only once the screen has been shown this long
    pub appears_after_ms: u64,
    pub goes_to: Option<String>,
    pub panics_on_click: bool,
}

impl FakeElement {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn xpath(mut self, xpath: &str) -> Self {
        self.xpath = Some(xpath.to_string());
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn appears_after(mut self, ms: u64) -> Self {
        self.appears_after_ms = ms;
        self
    }

    pub fn goes_to(mut self, screen: &str) -> Self {
        self.goes_to = Some(screen.to_string());
        self
    }

    pub fn panics_on_click(mut self) -> Self {
        self.panics_on_click = true;
        self
    }

    fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::XPath(x) => self.xpath.as_deref() == Some(x.as_str()),
            Selector::Text(t) => self.text.to_lowercase().contains(&t.to_lowercase()),
            Selector::Role { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && name.as_deref().map_or(true, |n| self.text.trim() == n)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeFrame {
    pub name: String,
    pub url: String,
    pub elements: Vec<FakeElement>,
}

impl FakeFrame {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            elements: Vec::new(),
        }
    }

    pub fn with(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakeScreen {
    pub frames: Vec<FakeFrame>,
    /// `document.readyState` reported for every frame
    pub ready_state: String,
}

impl FakeScreen {
    /// Screen with an empty main frame
    pub fn new(url: &str) -> Self {
        Self {
            frames: vec![FakeFrame::new("", url)],
            ready_state: "complete".to_string(),
        }
    }

    /// Add an element to the main frame
    pub fn with(mut self, element: FakeElement) -> Self {
        self.frames[0].elements.push(element);
        self
    }

    pub fn frame(mut self, frame: FakeFrame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn ready_state(mut self, state: &str) -> Self {
        self.ready_state = state.to_string();
        self
    }
}

#[derive(Debug, Clone)]
struct Script {
    screens: HashMap<String, FakeScreen>,
    routes: Vec<(String, String)>,
    start: String,
    failing_urls: Vec<String>,
}

/// Launcher handing out `FakeSession`s over one script
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    script: Script,
    fail_startup: bool,
    log: Arc<Mutex<Vec<String>>>,
    launches: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        let mut screens = HashMap::new();
        screens.insert("blank".to_string(), FakeScreen::new("about:blank"));
        Self {
            script: Script {
                screens,
                routes: Vec::new(),
                start: "blank".to_string(),
                failing_urls: Vec::new(),
            },
            fail_startup: false,
            log: Arc::new(Mutex::new(Vec::new())),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn screen(mut self, name: &str, screen: FakeScreen) -> Self {
        self.script.screens.insert(name.to_string(), screen);
        self
    }

    /// URLs ending with `suffix` show `screen`
    pub fn route(mut self, suffix: &str, screen: &str) -> Self {
        self.script
            .routes
            .push((suffix.to_string(), screen.to_string()));
        self
    }

    pub fn start_on(mut self, screen: &str) -> Self {
        self.script.start = screen.to_string();
        self
    }

    pub fn failing_url(mut self, url: &str) -> Self {
        self.script.failing_urls.push(url.to_string());
        self
    }

    pub fn failing_startup(mut self) -> Self {
        self.fail_startup = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _config: &WebDriverConfig) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_startup {
            bail!("browser executable not found");
        }
        self.log.lock().unwrap().push("launch".to_string());
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            state: Mutex::new(ScreenState {
                screen: self.script.start.clone(),
                entered: Instant::now(),
            }),
            log: self.log.clone(),
        }))
    }
}

struct ScreenState {
    screen: String,
    entered: Instant,
}

pub struct FakeSession {
    script: Script,
    state: Mutex<ScreenState>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeSession {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn show(&self, screen: &str) {
        let mut state = self.state.lock().unwrap();
        state.screen = screen.to_string();
        state.entered = Instant::now();
    }

    fn current(&self) -> Result<(FakeScreen, Duration)> {
        let state = self.state.lock().unwrap();
        let screen = self
            .script
            .screens
            .get(&state.screen)
            .cloned()
            .with_context(|| format!("unknown screen {}", state.screen))?;
        Ok((screen, state.entered.elapsed()))
    }

    /// Attached elements of `frame` matching `selector`
    fn matching(&self, frame: usize, selector: &Selector) -> Result<Vec<FakeElement>> {
        let (screen, shown_for) = self.current()?;
        let frame = screen
            .frames
            .get(frame)
            .with_context(|| format!("frame {} detached", frame))?;
        Ok(frame
            .elements
            .iter()
            .filter(|e| shown_for >= Duration::from_millis(e.appears_after_ms))
            .filter(|e| e.matches(selector))
            .cloned()
            .collect())
    }

    fn element(&self, element: &ElementRef) -> Result<FakeElement> {
        self.matching(element.frame, &element.selector)?
            .into_iter()
            .nth(element.nth)
            .context("element is gone")
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn browser_name(&self) -> &str {
        "fake"
    }

    async fn navigate(&self, url: &str, _wait_until: WaitUntil, _timeout_ms: u64) -> Result<()> {
        self.record(format!("navigate {}", url));
        if self.script.failing_urls.iter().any(|u| u == url) {
            bail!("net::ERR_CONNECTION_REFUSED at {}", url);
        }
        let target = self
            .script
            .routes
            .iter()
            .filter(|(suffix, _)| url.ends_with(suffix.as_str()))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, screen)| screen.clone());
        if let Some(screen) = target {
            self.show(&screen);
        }
        Ok(())
    }

    async fn frames(&self) -> Result<Vec<FrameInfo>> {
        let (screen, _) = self.current()?;
        Ok(screen
            .frames
            .iter()
            .enumerate()
            .map(|(index, f)| FrameInfo {
                index,
                name: f.name.clone(),
                url: f.url.clone(),
            })
            .collect())
    }

    async fn count_matches(&self, frame: usize, selector: &Selector) -> Result<usize> {
        Ok(self.matching(frame, selector)?.len())
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool> {
        Ok(!self.element(element)?.hidden)
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool> {
        Ok(!self.element(element)?.disabled)
    }

    async fn click(&self, element: &ElementRef, _timeout_ms: u64) -> Result<()> {
        let target = self.element(element)?;
        self.record(format!("click {}", target.text));
        if target.panics_on_click {
            panic!("renderer crashed while clicking {}", target.text);
        }
        if let Some(ref screen) = target.goes_to {
            self.show(screen);
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementRef, value: &str, _timeout_ms: u64) -> Result<()> {
        let target = self.element(element)?;
        self.record(format!("fill {}={}", target.text, value));
        Ok(())
    }

    async fn text_content(&self, element: &ElementRef) -> Result<String> {
        Ok(self.element(element)?.text)
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        self.record(format!("scroll {},{}", dx, dy));
        Ok(())
    }

    async fn ready_states(&self) -> Result<Vec<String>> {
        let (screen, _) = self.current()?;
        Ok(vec![screen.ready_state.clone(); screen.frames.len()])
    }

    async fn close_context(&mut self) -> Result<()> {
        self.record("close_context".to_string());
        Ok(())
    }

    async fn close_browser(&mut self) -> Result<()> {
        self.record("close_browser".to_string());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.record("stop".to_string());
        Ok(())
    }
}

/// The hero → path selection → career map journey
pub fn career_journey() -> FakeLauncher {
    let hero_card = "html/body/div/div/div/div[3]/div";
    FakeLauncher::new()
        .screen(
            "hero",
            FakeScreen::new("http://localhost:5173/")
                .with(FakeElement::new("CHOOSE YOUR HERO").role("heading"))
                .with(FakeElement::new("Data Engineer").xpath(hero_card).goes_to("paths"))
                .with(FakeElement::new("Data Scientist").xpath(hero_card).goes_to("paths")),
        )
        .screen(
            "paths",
            FakeScreen::new("http://localhost:5173/path-selection")
                .with(FakeElement::new("Data Engineer").role("heading"))
                .with(
                    FakeElement::new("START TECHNICAL PATH")
                        .xpath(hero_card)
                        .role("button")
                        .appears_after(500)
                        .goes_to("career-map"),
                )
                .with(
                    FakeElement::new("START BEHAVIORAL PATH")
                        .xpath(hero_card)
                        .role("button")
                        .goes_to("career-map"),
                ),
        )
        .screen(
            "career-map",
            FakeScreen::new("http://localhost:5173/career-map")
                .with(FakeElement::new("CAREER PATH").role("button").goes_to("hero"))
                .with(FakeElement::new("Data Engineer"))
                .with(FakeElement::new("Career Map").role("heading")),
        )
        .route("5173", "hero")
        .route("5173/", "hero")
        .route("/path-selection", "paths")
        .route("/career-map", "career-map")
}
