use log::{debug, warn};
use tokio::time::{sleep, Duration, Instant};

use super::context::RunContext;
use super::error::{FlowError, StepCause};
use super::resolver::LocatorResolver;
use crate::driver::traits::{BrowserSession, ElementRef};
use crate::parser::types::{LoadState, Locator, Step};
use crate::utils::config::Timeouts;

/// How a step ended when it did not fail the flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// Finished, but a tolerated problem was swallowed (load-state timeout, scroll error)
    Degraded(String),
}

/// Applies one step to a session
pub struct StepExecutor {
    resolver: LocatorResolver,
    timeouts: Timeouts,
}

impl StepExecutor {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            resolver: LocatorResolver::new(timeouts.poll_interval_ms),
            timeouts,
        }
    }

    pub async fn execute(
        &self,
        step: &Step,
        session: &dyn BrowserSession,
        ctx: &RunContext,
    ) -> Result<StepOutcome, FlowError> {
        let name = step.display_name();
        debug!("Executing step: {}", name);

        match step {
            Step::Navigate {
                url,
                wait_until,
                timeout_ms,
            } => {
                let url = ctx.resolve_url(&ctx.substitute_vars(url));
                let timeout = timeout_ms.unwrap_or(self.timeouts.navigation_ms);
                let navigation = session.navigate(&url, *wait_until, timeout);
                match tokio::time::timeout(Duration::from_millis(timeout), navigation).await {
                    Ok(Ok(())) => Ok(StepOutcome::Completed),
                    Ok(Err(e)) => Err(FlowError::step(&name, StepCause::Navigation(format!("{:#}", e)))),
                    Err(_) => Err(FlowError::step(
                        &name,
                        StepCause::Navigation(format!("{} not reached within {}ms", url, timeout)),
                    )),
                }
            }

            Step::Click { locator, timeout_ms } => {
                let timeout = timeout_ms.unwrap_or(self.timeouts.action_ms);
                let deadline = Instant::now() + Duration::from_millis(timeout);
                let element = self
                    .actionable(session, locator, timeout, deadline)
                    .await
                    .map_err(|cause| FlowError::step(&name, cause))?;
                session
                    .click(&element, remaining_ms(deadline))
                    .await
                    .map_err(|e| FlowError::step(&name, StepCause::Driver(format!("{:#}", e))))?;
                Ok(StepOutcome::Completed)
            }

            Step::Fill {
                locator,
                value,
                timeout_ms,
            } => {
                let timeout = timeout_ms.unwrap_or(self.timeouts.action_ms);
                let deadline = Instant::now() + Duration::from_millis(timeout);
                let element = self
                    .actionable(session, locator, timeout, deadline)
                    .await
                    .map_err(|cause| FlowError::step(&name, cause))?;
                let value = ctx.substitute_vars(value);
                session
                    .fill(&element, &value, remaining_ms(deadline))
                    .await
                    .map_err(|e| FlowError::step(&name, StepCause::Driver(format!("{:#}", e))))?;
                Ok(StepOutcome::Completed)
            }

            Step::Scroll { dx, dy } => match session.scroll_by(*dx, *dy).await {
                Ok(()) => Ok(StepOutcome::Completed),
                Err(e) => {
                    warn!("Scroll ({}, {}) ignored: {:#}", dx, dy, e);
                    Ok(StepOutcome::Degraded(format!("scroll ignored: {:#}", e)))
                }
            },

            Step::Wait { duration_ms } => {
                sleep(Duration::from_millis(*duration_ms)).await;
                Ok(StepOutcome::Completed)
            }

            Step::WaitForLoadState { state, timeout_ms } => {
                let timeout = timeout_ms.unwrap_or(self.timeouts.load_state_ms);
                if self.wait_for_load_state(session, *state, timeout).await {
                    Ok(StepOutcome::Completed)
                } else {
                    warn!("Load state '{}' not reached within {}ms, continuing", state, timeout);
                    Ok(StepOutcome::Degraded(format!(
                        "load state '{}' not reached within {}ms",
                        state, timeout
                    )))
                }
            }
        }
    }

    /// Resolve, then wait until the element is visible and enabled.
    /// Both phases share the step deadline.
    async fn actionable(
        &self,
        session: &dyn BrowserSession,
        locator: &Locator,
        timeout_ms: u64,
        deadline: Instant,
    ) -> Result<ElementRef, StepCause> {
        let element = self.resolver.resolve(session, locator, timeout_ms).await?;

        loop {
            let visible = session.is_visible(&element).await.unwrap_or(false);
            let enabled = session.is_enabled(&element).await.unwrap_or(false);
            if visible && enabled {
                return Ok(element);
            }

            let now = Instant::now();
            if now >= deadline {
                let state = match (visible, enabled) {
                    (false, false) => "not visible, disabled",
                    (false, true) => "not visible",
                    _ => "disabled",
                };
                return Err(StepCause::NotActionable {
                    locator: locator.to_string(),
                    timeout_ms,
                    state: state.to_string(),
                });
            }
            sleep(self.resolver.poll_interval().min(deadline - now)).await;
        }
    }

    /// True once every frame reports a ready state satisfying `state`
    async fn wait_for_load_state(
        &self,
        session: &dyn BrowserSession,
        state: LoadState,
        timeout_ms: u64,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match session.ready_states().await {
                Ok(states) if states.iter().all(|s| state.satisfied_by(s)) => return true,
                Ok(states) => debug!("Ready states {:?}, waiting for {}", states, state),
                Err(e) => debug!("Reading ready state failed: {:#}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(self.resolver.poll_interval().min(deadline - now)).await;
        }
    }
}

fn remaining_ms(deadline: Instant) -> u64 {
    (deadline.saturating_duration_since(Instant::now()).as_millis() as u64).max(1)
}
