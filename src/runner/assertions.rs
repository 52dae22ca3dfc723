use log::debug;
use tokio::time::{sleep, Duration, Instant};

use super::context::RunContext;
use super::resolver::{LocatorResolver, Resolution};
use crate::driver::traits::{BrowserSession, ElementRef};
use crate::parser::types::{Assertion, AssertionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionOutcome {
    Passed,
    /// Timed out; `actual` is the last observed state
    Failed { expected: String, actual: String },
}

/// Evaluates expected-state predicates by polling the session
pub struct AssertionChecker {
    resolver: LocatorResolver,
    default_timeout_ms: u64,
}

/// Comparison target after variable substitution
enum Expectation {
    Visible,
    Hidden,
    TextEquals(String),
    TextContains(String),
}

impl Expectation {
    fn describe(&self) -> String {
        match self {
            Expectation::Visible => "visible".to_string(),
            Expectation::Hidden => "hidden".to_string(),
            Expectation::TextEquals(t) => format!("text \"{}\"", t),
            Expectation::TextContains(t) => format!("text containing \"{}\"", t),
        }
    }
}

impl AssertionChecker {
    pub fn new(poll_interval_ms: u64, default_timeout_ms: u64) -> Self {
        Self {
            resolver: LocatorResolver::new(poll_interval_ms),
            default_timeout_ms,
        }
    }

    pub async fn check(
        &self,
        assertion: &Assertion,
        session: &dyn BrowserSession,
        ctx: &RunContext,
    ) -> AssertionOutcome {
        let expectation = match &assertion.kind {
            AssertionKind::Visible => Expectation::Visible,
            AssertionKind::Hidden => Expectation::Hidden,
            AssertionKind::TextEquals(t) => {
                Expectation::TextEquals(ctx.substitute_vars(t).trim().to_string())
            }
            AssertionKind::TextContains(t) => {
                Expectation::TextContains(ctx.substitute_vars(t).trim().to_string())
            }
        };

        let timeout_ms = assertion.timeout_ms.unwrap_or(self.default_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            let (holds, observed) = self.observe(assertion, &expectation, session).await;
            if holds {
                return AssertionOutcome::Passed;
            }

            let now = Instant::now();
            if now >= deadline {
                return AssertionOutcome::Failed {
                    expected: expectation.describe(),
                    actual: observed,
                };
            }
            debug!("{}: observed {}, polling", assertion.display_name(), observed);
            sleep(self.resolver.poll_interval().min(deadline - now)).await;
        }
    }

    /// One observation: whether the predicate holds, and what was seen
    async fn observe(
        &self,
        assertion: &Assertion,
        expectation: &Expectation,
        session: &dyn BrowserSession,
    ) -> (bool, String) {
        let element = match self.resolver.try_resolve(session, &assertion.locator).await {
            Ok(Resolution::Found(element)) => element,
            Ok(Resolution::Missing { matches }) => {
                let seen = if matches == 0 {
                    "not found".to_string()
                } else {
                    format!("only {} match(es)", matches)
                };
                return (matches!(expectation, Expectation::Hidden), seen);
            }
            Err(e) => return (false, format!("driver error: {:#}", e)),
        };

        match expectation {
            Expectation::Visible => visibility(session, &element, true).await,
            Expectation::Hidden => visibility(session, &element, false).await,
            Expectation::TextEquals(expected) => match session.text_content(&element).await {
                Ok(text) => {
                    let text = text.trim();
                    (text == expected, format!("text \"{}\"", text))
                }
                Err(e) => (false, format!("driver error: {:#}", e)),
            },
            Expectation::TextContains(expected) => match session.text_content(&element).await {
                Ok(text) => {
                    let text = text.trim();
                    (text.contains(expected.as_str()), format!("text \"{}\"", text))
                }
                Err(e) => (false, format!("driver error: {:#}", e)),
            },
        }
    }
}

async fn visibility(session: &dyn BrowserSession, element: &ElementRef, want: bool) -> (bool, String) {
    match session.is_visible(element).await {
        Ok(true) => (want, "visible".to_string()),
        Ok(false) => (!want, "present but not visible".to_string()),
        Err(e) => (false, format!("driver error: {:#}", e)),
    }
}
