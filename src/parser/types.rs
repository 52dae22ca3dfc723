use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Represents a parsed flow: ordered steps followed by trailing assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub name: String,

    /// Base URL; relative `navigate` targets are joined to it
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, alias = "defaultTimeout")]
    pub default_timeout_ms: Option<u64>,

    /// Browser engine: "chromium", "firefox", "webkit"
    #[serde(default)]
    pub browser: Option<String>,

    #[serde(default)]
    pub headless: Option<bool>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl FlowDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            url: None,
            tags: Vec::new(),
            default_timeout_ms: None,
            browser: None,
            headless: None,
            env: HashMap::new(),
            steps: Vec::new(),
            assertions: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_assertions(mut self, assertions: Vec<Assertion>) -> Self {
        self.assertions = assertions;
        self
    }

    /// True when the flow carries every tag in `required`
    pub fn has_tags(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.tags.contains(t))
    }
}

/// Condition `navigate` waits for before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// Return as soon as navigation has started
    #[default]
    Commit,
    #[serde(alias = "domContentLoaded")]
    DomContentLoaded,
    Load,
    #[serde(alias = "networkIdle")]
    NetworkIdle,
}

/// Document readiness that `waitForLoadState` polls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    #[default]
    #[serde(alias = "domContentLoaded")]
    DomContentLoaded,
    Load,
    #[serde(alias = "networkIdle")]
    NetworkIdle,
}

impl LoadState {
    /// Whether a `document.readyState` value satisfies this load state
    pub fn satisfied_by(&self, ready_state: &str) -> bool {
        match self {
            LoadState::DomContentLoaded => {
                ready_state == "interactive" || ready_state == "complete"
            }
            LoadState::Load | LoadState::NetworkIdle => ready_state == "complete",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::Load => "load",
            LoadState::NetworkIdle => "networkidle",
        };
        f.write_str(s)
    }
}

/// One UI action. Steps never reference each other's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Step {
    Navigate {
        url: String,
        #[serde(default)]
        wait_until: WaitUntil,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Click {
        locator: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Fill {
        locator: Locator,
        value: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Scroll {
        #[serde(default)]
        dx: i64,
        #[serde(default)]
        dy: i64,
    },
    Wait {
        duration_ms: u64,
    },
    WaitForLoadState {
        #[serde(default)]
        state: LoadState,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

impl Step {
    /// Human readable name used in events and reports
    pub fn display_name(&self) -> String {
        match self {
            Step::Navigate { url, wait_until, .. } => {
                format!("navigate {} ({:?})", url, wait_until)
            }
            Step::Click { locator, .. } => format!("click {}", locator),
            Step::Fill { locator, value, .. } => format!("fill {} \"{}\"", locator, value),
            Step::Scroll { dx, dy } => format!("scroll ({}, {})", dx, dy),
            Step::Wait { duration_ms } => format!("wait {}ms", duration_ms),
            Step::WaitForLoadState { state, .. } => format!("waitForLoadState {}", state),
        }
    }
}

/// How a locator finds candidate elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocatorStrategy {
    XPath(String),
    Text(String),
    Role { role: String, name: Option<String> },
}

/// Declarative element reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locator {
    pub strategy: LocatorStrategy,

    /// 0-based ordinal among all matches; absent means the first match
    #[serde(default)]
    pub index: Option<usize>,

    /// Restrict the search to frames whose name or URL contains this value
    #[serde(default)]
    pub frame: Option<String>,
}

impl Locator {
    pub fn xpath(expr: &str) -> Self {
        Self::from_strategy(LocatorStrategy::XPath(expr.to_string()))
    }

    pub fn text(text: &str) -> Self {
        Self::from_strategy(LocatorStrategy::Text(text.to_string()))
    }

    pub fn role(role: &str, name: Option<&str>) -> Self {
        Self::from_strategy(LocatorStrategy::Role {
            role: role.to_string(),
            name: name.map(str::to_string),
        })
    }

    fn from_strategy(strategy: LocatorStrategy) -> Self {
        Self {
            strategy,
            index: None,
            frame: None,
        }
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn in_frame(mut self, frame: &str) -> Self {
        self.frame = Some(frame.to_string());
        self
    }

    pub fn ordinal(&self) -> usize {
        self.index.unwrap_or(0)
    }

    /// Parse the string shorthand: `xpath=...`, `text=...`, `role=button`,
    /// a bare path starting with `/` or `(` (XPath), or plain text.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("xpath=") {
            Self::xpath(rest)
        } else if let Some(rest) = s.strip_prefix("text=") {
            Self::text(rest.trim_matches('"'))
        } else if let Some(rest) = s.strip_prefix("role=") {
            Self::role(rest, None)
        } else if s.starts_with('/') || s.starts_with('(') {
            Self::xpath(s)
        } else {
            Self::text(s)
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.strategy {
            LocatorStrategy::XPath(x) => write!(f, "xpath={}", x)?,
            LocatorStrategy::Text(t) => write!(f, "text=\"{}\"", t)?,
            LocatorStrategy::Role { role, name: None } => write!(f, "role={}", role)?,
            LocatorStrategy::Role {
                role,
                name: Some(n),
            } => write!(f, "role={}[name=\"{}\"]", role, n)?,
        }
        if let Some(i) = self.index {
            write!(f, " >> nth={}", i)?;
        }
        if let Some(ref fr) = self.frame {
            write!(f, " (frame: {})", fr)?;
        }
        Ok(())
    }
}

/// Expected-state predicate over a locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionKind {
    Visible,
    Hidden,
    TextEquals(String),
    TextContains(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub locator: Locator,
    pub kind: AssertionKind,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Assertion {
    pub fn visible(locator: Locator) -> Self {
        Self {
            locator,
            kind: AssertionKind::Visible,
            timeout_ms: None,
        }
    }

    pub fn hidden(locator: Locator) -> Self {
        Self {
            locator,
            kind: AssertionKind::Hidden,
            timeout_ms: None,
        }
    }

    pub fn text_equals(locator: Locator, expected: &str) -> Self {
        Self {
            locator,
            kind: AssertionKind::TextEquals(expected.to_string()),
            timeout_ms: None,
        }
    }

    pub fn text_contains(locator: Locator, expected: &str) -> Self {
        Self {
            locator,
            kind: AssertionKind::TextContains(expected.to_string()),
            timeout_ms: None,
        }
    }

    pub fn within(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn display_name(&self) -> String {
        match &self.kind {
            AssertionKind::Visible => format!("assertVisible {}", self.locator),
            AssertionKind::Hidden => format!("assertHidden {}", self.locator),
            AssertionKind::TextEquals(e) => {
                format!("assertText {} == \"{}\"", self.locator, e)
            }
            AssertionKind::TextContains(e) => {
                format!("assertText {} contains \"{}\"", self.locator, e)
            }
        }
    }
}
