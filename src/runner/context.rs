use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::parser::types::FlowDefinition;
use crate::utils::config::Config;

/// Per-flow runtime values: base URL and variables
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Relative navigation targets are joined to this
    pub base_url: Option<String>,

    /// Variables from the flow header `env`
    pub env: HashMap<String, String>,
}

impl RunContext {
    pub fn new(config: &Config, flow: &FlowDefinition) -> Self {
        Self {
            base_url: config.base_url.clone(),
            env: flow.env.clone(),
        }
    }

    /// Look a variable up in the flow env, then the process environment
    pub fn get_var(&self, name: &str) -> Option<String> {
        self.env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    /// Substitute `${name}` placeholders; unknown names are left as written
    pub fn substitute_vars(&self, text: &str) -> String {
        static VAR_RE: OnceLock<Regex> = OnceLock::new();
        let re = VAR_RE.get_or_init(|| {
            Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").expect("variable pattern is valid")
        });

        re.replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];
            if let Some(val) = self.get_var(key) {
                return val;
            }
            match key {
                "time" => chrono::Local::now().format("%H:%M:%S").to_string(),
                "date" => chrono::Local::now().format("%Y-%m-%d").to_string(),
                "timestamp" => chrono::Utc::now().timestamp().to_string(),
                _ => format!("${{{}}}", key),
            }
        })
        .to_string()
    }

    /// Absolute URLs pass through; anything else is joined to the base URL
    pub fn resolve_url(&self, url: &str) -> String {
        let is_absolute = url.contains("://")
            || url.starts_with("about:")
            || url.starts_with("data:");
        match (&self.base_url, is_absolute) {
            (Some(base), false) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            _ => url.to_string(),
        }
    }
}
