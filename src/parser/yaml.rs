use super::types::{
    Assertion, AssertionKind, FlowDefinition, LoadState, Locator, LocatorStrategy, Step, WaitUntil,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Parse a YAML flow file into a FlowDefinition
pub fn parse_flow_file(path: &Path) -> Result<FlowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    parse_flow_content(&content, path)
        .with_context(|| format!("Failed to parse flow: {}", path.display()))
}

/// Parse YAML content into a FlowDefinition.
///
/// Accepted layouts:
/// - header mapping, a `---` line, then a list of steps and assertions
/// - a single mapping with `steps` and optional `assertions`
/// - a bare list of steps and assertions
pub fn parse_flow_content(content: &str, source_path: &Path) -> Result<FlowDefinition> {
    let default_name = source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    // 1. Header / body separated by a `---` line
    if let Some((header, body)) = split_document(content) {
        let mut flow = if header.trim().is_empty() {
            FlowDefinition::new(&default_name)
        } else {
            parse_header(header, &default_name)?
        };
        let value: serde_yaml::Value =
            serde_yaml::from_str(body).context("Failed to parse flow body")?;
        let (steps, assertions) = parse_entries(&value)?;
        flow.steps = steps;
        flow.assertions = assertions;
        return Ok(flow);
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(content).context("Failed to parse YAML content")?;

    match value {
        // 2. Bare list
        serde_yaml::Value::Sequence(_) => {
            let (steps, assertions) = parse_entries(&value)?;
            Ok(FlowDefinition::new(&default_name)
                .with_steps(steps)
                .with_assertions(assertions))
        }
        // 3. Single mapping
        serde_yaml::Value::Mapping(ref map) => {
            let mut header_map = map.clone();
            let steps_val = header_map
                .remove("steps")
                .or_else(|| header_map.remove("commands"));
            let assertions_val = header_map.remove("assertions");

            let header_yaml = serde_yaml::to_string(&header_map)?;
            let mut flow = parse_header(&header_yaml, &default_name)?;

            if let Some(val) = steps_val {
                let (steps, assertions) = parse_entries(&val)?;
                flow.steps = steps;
                flow.assertions = assertions;
            }
            if let Some(val) = assertions_val {
                let seq = val
                    .as_sequence()
                    .context("`assertions` must be a list")?;
                for item in seq {
                    match parse_entry(item)? {
                        Entry::Assertion(a) => flow.assertions.push(a),
                        Entry::Step(s) => anyhow::bail!(
                            "`assertions` may only contain assertions, found: {}",
                            s.display_name()
                        ),
                    }
                }
            }
            Ok(flow)
        }
        _ => anyhow::bail!("Invalid YAML format: expected a list of steps or a flow mapping"),
    }
}

/// Split at the first line consisting of `---` with content on both sides
fn split_document(content: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let header = &content[..offset];
            let body = &content[offset + line.len()..];
            if body.trim().is_empty() {
                return None;
            }
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Parse the header section of a YAML flow file
fn parse_header(header: &str, default_name: &str) -> Result<FlowDefinition> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Header {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default, alias = "defaultTimeout")]
        default_timeout_ms: Option<u64>,
        #[serde(default)]
        browser: Option<String>,
        #[serde(default)]
        headless: Option<bool>,
        #[serde(default, alias = "vars")]
        env: Option<HashMap<String, serde_yaml::Value>>,
    }

    let parsed: Header = serde_yaml::from_str(header).context("Failed to parse YAML header")?;

    let mut flow = FlowDefinition::new(parsed.name.as_deref().unwrap_or(default_name));
    flow.url = parsed.url;
    flow.tags = parsed.tags;
    flow.default_timeout_ms = parsed.default_timeout_ms;
    flow.browser = parsed.browser;
    flow.headless = parsed.headless;

    if let Some(env) = parsed.env {
        for (k, v) in env {
            let value = match v {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => anyhow::bail!("Unsupported env value for '{}': {:?}", k, other),
            };
            flow.env.insert(k, value);
        }
    }

    Ok(flow)
}

enum Entry {
    Step(Step),
    Assertion(Assertion),
}

/// Parse a list of entries into steps followed by trailing assertions
fn parse_entries(value: &serde_yaml::Value) -> Result<(Vec<Step>, Vec<Assertion>)> {
    let seq = match value {
        serde_yaml::Value::Sequence(seq) => seq,
        serde_yaml::Value::Null => return Ok((Vec::new(), Vec::new())),
        _ => anyhow::bail!("Expected a list of steps"),
    };

    let mut steps = Vec::new();
    let mut assertions = Vec::new();

    for (i, item) in seq.iter().enumerate() {
        match parse_entry(item).with_context(|| format!("Invalid entry at position {}", i))? {
            Entry::Step(step) => {
                if !assertions.is_empty() {
                    anyhow::bail!(
                        "Step '{}' at position {} follows an assertion; assertions must come last",
                        step.display_name(),
                        i
                    );
                }
                steps.push(step);
            }
            Entry::Assertion(a) => assertions.push(a),
        }
    }

    Ok((steps, assertions))
}

fn parse_entry(value: &serde_yaml::Value) -> Result<Entry> {
    match value {
        serde_yaml::Value::Mapping(map) => {
            if map.len() != 1 {
                anyhow::bail!("Each entry must have exactly one key, found {}", map.len());
            }
            let (key, params) = map.iter().next().context("Empty entry")?;
            let name = key.as_str().context("Entry key must be a string")?;
            parse_entry_with_params(name, params)
        }
        serde_yaml::Value::String(name) => {
            anyhow::bail!("Entry '{}' requires parameters", name)
        }
        _ => anyhow::bail!("Invalid entry: {:?}", value),
    }
}

/// Flat parameter bag shared by every entry that targets an element
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementParams {
    #[serde(default)]
    xpath: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "nth")]
    index: Option<usize>,
    #[serde(default)]
    frame: Option<String>,
    #[serde(default, alias = "timeoutMs")]
    timeout: Option<u64>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default, alias = "expected")]
    equals: Option<String>,
    #[serde(default)]
    contains: Option<String>,
}

impl ElementParams {
    fn from_value(value: &serde_yaml::Value) -> Result<Self> {
        match value {
            serde_yaml::Value::String(s) => {
                let locator = Locator::parse(s);
                let mut params = ElementParams::default();
                match locator.strategy {
                    LocatorStrategy::XPath(x) => params.xpath = Some(x),
                    LocatorStrategy::Text(t) => params.text = Some(t),
                    LocatorStrategy::Role { role, name } => {
                        params.role = Some(role);
                        params.name = name;
                    }
                }
                Ok(params)
            }
            serde_yaml::Value::Mapping(_) => {
                serde_yaml::from_value(value.clone()).context("Invalid element parameters")
            }
            _ => anyhow::bail!("Expected a locator string or mapping"),
        }
    }

    fn locator(&self) -> Result<Locator> {
        let strategy = match (&self.xpath, &self.text, &self.role) {
            (Some(x), None, None) => LocatorStrategy::XPath(x.trim_start_matches("xpath=").to_string()),
            (None, Some(t), None) => LocatorStrategy::Text(t.clone()),
            (None, None, Some(r)) => LocatorStrategy::Role {
                role: r.clone(),
                name: self.name.clone(),
            },
            (None, None, None) => anyhow::bail!("No locator specified (xpath, text or role)"),
            _ => anyhow::bail!("Only one of xpath, text or role may be specified"),
        };
        Ok(Locator {
            strategy,
            index: self.index,
            frame: self.frame.clone(),
        })
    }
}

fn parse_entry_with_params(name: &str, params: &serde_yaml::Value) -> Result<Entry> {
    let entry = match name {
        "navigate" | "open" | "goto" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct NavigateParams {
                url: String,
                #[serde(default)]
                wait_until: WaitUntil,
                #[serde(default, alias = "timeoutMs")]
                timeout: Option<u64>,
            }
            let p = match params {
                serde_yaml::Value::String(url) => NavigateParams {
                    url: url.clone(),
                    wait_until: WaitUntil::default(),
                    timeout: None,
                },
                _ => serde_yaml::from_value(params.clone()).context("Invalid navigate params")?,
            };
            Entry::Step(Step::Navigate {
                url: p.url,
                wait_until: p.wait_until,
                timeout_ms: p.timeout,
            })
        }

        "click" | "tap" | "tapOn" => {
            let p = ElementParams::from_value(params)?;
            Entry::Step(Step::Click {
                locator: p.locator()?,
                timeout_ms: p.timeout,
            })
        }

        "fill" => {
            let p = ElementParams::from_value(params)?;
            let value = p
                .value
                .clone()
                .context("fill requires a `value`")?;
            Entry::Step(Step::Fill {
                locator: p.locator()?,
                value,
                timeout_ms: p.timeout,
            })
        }

        "scroll" => {
            #[derive(Deserialize)]
            struct ScrollParams {
                #[serde(default)]
                dx: i64,
                #[serde(default)]
                dy: i64,
            }
            let p: ScrollParams =
                serde_yaml::from_value(params.clone()).context("Invalid scroll params")?;
            Entry::Step(Step::Scroll { dx: p.dx, dy: p.dy })
        }

        "wait" | "sleep" => {
            let duration_ms = match params {
                serde_yaml::Value::Number(n) => n.as_u64().context("wait must be a positive number")?,
                serde_yaml::Value::Mapping(map) => map
                    .get("ms")
                    .or_else(|| map.get("duration"))
                    .and_then(|v| v.as_u64())
                    .context("wait requires `ms`")?,
                _ => anyhow::bail!("Invalid wait params: {:?}", params),
            };
            Entry::Step(Step::Wait { duration_ms })
        }

        "waitForLoadState" => {
            #[derive(Deserialize)]
            struct LoadParams {
                #[serde(default)]
                state: LoadState,
                #[serde(default, alias = "timeoutMs")]
                timeout: Option<u64>,
            }
            let p: LoadParams = match params {
                serde_yaml::Value::String(_) => LoadParams {
                    state: serde_yaml::from_value(params.clone())
                        .context("Unknown load state")?,
                    timeout: None,
                },
                serde_yaml::Value::Null => LoadParams {
                    state: LoadState::default(),
                    timeout: None,
                },
                _ => serde_yaml::from_value(params.clone())
                    .context("Invalid waitForLoadState params")?,
            };
            Entry::Step(Step::WaitForLoadState {
                state: p.state,
                timeout_ms: p.timeout,
            })
        }

        "assertVisible" | "see" => assertion(params, |_| Ok(AssertionKind::Visible))?,

        "assertHidden" | "assertNotVisible" | "notSee" => {
            assertion(params, |_| Ok(AssertionKind::Hidden))?
        }

        "assertText" => assertion(params, |p| match (&p.equals, &p.contains) {
            (Some(e), None) => Ok(AssertionKind::TextEquals(e.clone())),
            (None, Some(c)) => Ok(AssertionKind::TextContains(c.clone())),
            _ => anyhow::bail!("assertText requires exactly one of `equals` or `contains`"),
        })?,

        "assertTextEquals" => assertion(params, |p| {
            p.equals
                .clone()
                .map(AssertionKind::TextEquals)
                .context("assertTextEquals requires `equals`")
        })?,

        "assertTextContains" => assertion(params, |p| {
            p.contains
                .clone()
                .map(AssertionKind::TextContains)
                .context("assertTextContains requires `contains`")
        })?,

        _ => anyhow::bail!("Unknown step or assertion: {}", name),
    };

    Ok(entry)
}

fn assertion<F>(params: &serde_yaml::Value, kind: F) -> Result<Entry>
where
    F: FnOnce(&ElementParams) -> Result<AssertionKind>,
{
    let p = ElementParams::from_value(params)?;
    Ok(Entry::Assertion(Assertion {
        locator: p.locator()?,
        kind: kind(&p)?,
        timeout_ms: p.timeout,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_flow() {
        let yaml = r#"
name: hero_to_career_path
url: http://localhost:5173
tags: [career]
---
- navigate:
    url: /
    waitUntil: commit
    timeout: 10000
- waitForLoadState:
    state: domcontentloaded
    timeout: 3000
- wait: 3000
- click:
    xpath: html/body/div/div/div/div[3]/div
    index: 0
    timeout: 5000
- assertVisible:
    text: CAREER PATH
    timeout: 30000
- assertHidden: "text=Career Map"
"#;

        let flow = parse_flow_content(yaml, Path::new("flows/x.yaml")).unwrap();
        assert_eq!(flow.name, "hero_to_career_path");
        assert_eq!(flow.url.as_deref(), Some("http://localhost:5173"));
        assert_eq!(flow.tags, vec!["career".to_string()]);
        assert_eq!(flow.steps.len(), 4);
        assert_eq!(flow.assertions.len(), 2);

        assert_eq!(
            flow.steps[0],
            Step::Navigate {
                url: "/".to_string(),
                wait_until: WaitUntil::Commit,
                timeout_ms: Some(10000),
            }
        );
        assert_eq!(
            flow.steps[3],
            Step::Click {
                locator: Locator::xpath("html/body/div/div/div/div[3]/div").nth(0),
                timeout_ms: Some(5000),
            }
        );
        assert_eq!(
            flow.assertions[1],
            Assertion::hidden(Locator::text("Career Map"))
        );
    }

    #[test]
    fn test_parse_mapping_flow_uses_file_stem() {
        let yaml = r#"
steps:
  - fill:
      role: textbox
      name: Query
      value: "SELECT * FROM users"
  - scroll: { dy: 300 }
assertions:
  - assertText:
      xpath: //pre
      contains: SELECT
"#;
        let flow = parse_flow_content(yaml, Path::new("flows/query_master.yaml")).unwrap();
        assert_eq!(flow.name, "query_master");
        assert_eq!(flow.steps[1], Step::Scroll { dx: 0, dy: 300 });
        assert_eq!(
            flow.assertions[0].kind,
            AssertionKind::TextContains("SELECT".to_string())
        );
    }

    #[test]
    fn test_step_after_assertion_is_rejected() {
        let yaml = r#"
- assertVisible: "Ready"
- click: "START RUN"
"#;
        let err = parse_flow_content(yaml, Path::new("x.yaml")).unwrap_err();
        assert!(format!("{:#}", err).contains("assertions must come last"));
    }

    #[test]
    fn test_conflicting_locators_rejected() {
        let yaml = r#"
- click:
    xpath: //button
    text: Back
"#;
        assert!(parse_flow_content(yaml, Path::new("x.yaml")).is_err());
    }

    #[test]
    fn test_unknown_entry_rejected() {
        let yaml = "- swipeLeft: {}\n";
        let err = parse_flow_content(yaml, Path::new("x.yaml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown step or assertion"));
    }
}
