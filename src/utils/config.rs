use anyhow::{bail, Context, Result};
use log::warn;
use std::path::PathBuf;

use crate::driver::web::{BrowserType, WebDriverConfig};
use crate::parser::types::FlowDefinition;

/// Per-operation timeouts (ms)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub navigation_ms: u64,
    /// Locator resolution and click/fill actionability
    pub action_ms: u64,
    pub load_state_ms: u64,
    pub assertion_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 10000,
            action_ms: 5000,
            load_state_ms: 3000,
            assertion_ms: 30000,
            poll_interval_ms: 100,
        }
    }
}

/// Values given on the command line; they win over everything else
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub headless: Option<bool>,
    pub browser: Option<BrowserType>,
    pub base_url: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub timeouts: Timeouts,
    pub headless: bool,
    pub browser: BrowserType,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub base_url: Option<String>,
    pub executable: Option<PathBuf>,
    pub overrides: Overrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            headless: true,
            browser: BrowserType::Chromium,
            viewport_width: 1280,
            viewport_height: 720,
            base_url: None,
            executable: None,
            overrides: Overrides::default(),
        }
    }
}

impl Config {
    /// Defaults layered with `FLOWPILOT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("FLOWPILOT_HEADLESS") {
            config.headless = parse_bool(&v)
                .with_context(|| format!("FLOWPILOT_HEADLESS: invalid value '{}'", v))?;
        }
        if let Some(v) = lookup("FLOWPILOT_BASE_URL") {
            if !v.trim().is_empty() {
                config.base_url = Some(v.trim().to_string());
            }
        }
        if let Some(v) = lookup("FLOWPILOT_BROWSER") {
            config.browser = BrowserType::from_name(&v)
                .with_context(|| format!("FLOWPILOT_BROWSER: unknown browser '{}'", v))?;
        }
        if let Some(v) = lookup("FLOWPILOT_TIMEOUT_MS") {
            let ms: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("FLOWPILOT_TIMEOUT_MS: invalid value '{}'", v))?;
            config.timeouts.action_ms = ms;
        }
        if let Some(v) = lookup("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH") {
            config.executable = Some(PathBuf::from(v));
        }

        Ok(config)
    }

    /// Configuration for one flow: its header applies over the base layers,
    /// command line overrides apply last.
    pub fn for_flow(&self, flow: &FlowDefinition) -> Config {
        let mut config = self.clone();

        if let Some(ref url) = flow.url {
            config.base_url = Some(url.clone());
        }
        if let Some(ms) = flow.default_timeout_ms {
            config.timeouts.action_ms = ms;
            config.timeouts.assertion_ms = ms;
        }
        if let Some(ref name) = flow.browser {
            match BrowserType::from_name(name) {
                Some(b) => config.browser = b,
                None => warn!("Flow '{}': unknown browser '{}', keeping {}", flow.name, name, config.browser.as_str()),
            }
        }
        if let Some(h) = flow.headless {
            config.headless = h;
        }

        config.apply_overrides();
        config
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self.apply_overrides();
        self
    }

    fn apply_overrides(&mut self) {
        if let Some(h) = self.overrides.headless {
            self.headless = h;
        }
        if let Some(b) = self.overrides.browser {
            self.browser = b;
        }
        if let Some(ref url) = self.overrides.base_url {
            self.base_url = Some(url.clone());
        }
    }

    pub fn driver_config(&self) -> WebDriverConfig {
        WebDriverConfig {
            browser_type: self.browser,
            headless: self.headless,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            executable: self.executable.clone(),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected true/false"),
    }
}
