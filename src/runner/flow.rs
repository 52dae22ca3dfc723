//! Flow runner: one flow, one browser session.
//!
//! `Idle → SessionStarting → Running → {Passed, Failed} → TornDown`. Startup
//! failure skips `Running`. Teardown closes the context, then the browser,
//! then stops the driver, whatever happened before it, including panics and
//! cancellation.

use futures::FutureExt;
use log::{info, warn};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use super::assertions::{AssertionChecker, AssertionOutcome};
use super::context::RunContext;
use super::error::{FlowError, StepCause};
use super::events::{EventEmitter, RunEvent};
use super::executor::{StepExecutor, StepOutcome};
use super::state::{Lifecycle, Phase, RunOutcome, RunResult, RunTracker, StepState};
use crate::driver::traits::{BrowserLauncher, BrowserSession};
use crate::parser::types::FlowDefinition;
use crate::utils::config::Config;

/// Tracker shared between the running flow and the cancel/panic paths
struct Shared(Mutex<RunTracker>);

impl Shared {
    fn with<R>(&self, f: impl FnOnce(&mut RunTracker) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    fn into_inner(self) -> RunTracker {
        self.0.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct FlowRunner {
    launcher: Arc<dyn BrowserLauncher>,
    config: Config,
    emitter: EventEmitter,
}

impl FlowRunner {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: Config) -> Self {
        Self {
            launcher,
            config,
            emitter: EventEmitter::default(),
        }
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Run one flow to completion
    pub async fn run(&self, flow: &FlowDefinition) -> RunResult {
        self.run_until(flow, std::future::pending::<()>()).await
    }

    /// Run one flow, aborting it when `cancel` completes. Teardown still runs.
    pub async fn run_until<C>(&self, flow: &FlowDefinition, cancel: C) -> RunResult
    where
        C: Future<Output = ()>,
    {
        let config = self.config.for_flow(flow);
        let ctx = RunContext::new(&config, flow);
        let started = Instant::now();

        let steps = flow
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| StepState::new(i, Phase::Step, &s.display_name()))
            .collect();
        let assertions = flow
            .assertions
            .iter()
            .enumerate()
            .map(|(i, a)| StepState::new(i, Phase::Assertion, &a.display_name()))
            .collect();
        let tracker = Shared(Mutex::new(RunTracker::new(steps, assertions)));

        self.emitter.emit(RunEvent::FlowStarted {
            flow_name: flow.name.clone(),
            step_count: flow.steps.len(),
            assertion_count: flow.assertions.len(),
        });

        tokio::pin!(cancel);

        tracker.with(|t| t.transition(Lifecycle::SessionStarting));
        let driver_config = config.driver_config();
        let launch = AssertUnwindSafe(self.launcher.launch(&driver_config)).catch_unwind();
        let launched = tokio::select! {
            biased;
            _ = &mut cancel => Err(FlowError::Cancelled),
            r = launch => match r {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(e)) => Err(FlowError::SessionStartupFailed(format!("{:#}", e))),
                Err(panic) => Err(FlowError::SessionStartupFailed(panic_message(panic))),
            },
        };

        let mut session = match launched {
            Ok(session) => session,
            Err(error) => {
                warn!("Flow '{}': {}", flow.name, error);
                self.emitter.emit(RunEvent::StepFailed {
                    flow_name: flow.name.clone(),
                    phase: Phase::Session,
                    index: 0,
                    error: error.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                tracker.with(|t| {
                    t.fail_session(error);
                    t.transition(Lifecycle::TornDown);
                });
                return self.finish(flow, tracker, started);
            }
        };
        info!("Flow '{}': session started ({})", flow.name, session.browser_name());

        tracker.with(|t| t.transition(Lifecycle::Running));
        let body = AssertUnwindSafe(self.execute(flow, session.as_ref(), &ctx, &config, &tracker))
            .catch_unwind();
        let result = tokio::select! {
            biased;
            _ = &mut cancel => Err(FlowError::Cancelled),
            r = body => match r {
                Ok(r) => r,
                Err(panic) => {
                    let step = tracker
                        .with(|t| t.current().map(|(phase, i)| t.entry(phase, i).display.clone()))
                        .unwrap_or_else(|| flow.name.clone());
                    Err(FlowError::step(&step, StepCause::Driver(panic_message(panic))))
                }
            },
        };

        match result {
            Ok(()) => tracker.with(|t| {
                t.outcome = Some(RunOutcome::Passed);
                t.transition(Lifecycle::Passed);
            }),
            Err(error) => {
                let failed = tracker.with(|t| {
                    let current = t.current().map(|(phase, i)| (phase, i, t.entry(phase, i).started_at));
                    t.fail_current(error.clone());
                    t.transition(Lifecycle::Failed);
                    current
                });
                if let Some((phase, index, started_at)) = failed {
                    self.emitter.emit(RunEvent::StepFailed {
                        flow_name: flow.name.clone(),
                        phase,
                        index,
                        error: error.to_string(),
                        duration_ms: started_at
                            .map(|s| s.elapsed().as_millis() as u64)
                            .unwrap_or(0),
                    });
                }
            }
        }

        teardown(&flow.name, session.as_mut()).await;
        tracker.with(|t| t.transition(Lifecycle::TornDown));

        self.finish(flow, tracker, started)
    }

    /// Steps in order, then assertions in order; stops at the first failure
    async fn execute(
        &self,
        flow: &FlowDefinition,
        session: &dyn BrowserSession,
        ctx: &RunContext,
        config: &Config,
        tracker: &Shared,
    ) -> Result<(), FlowError> {
        let executor = StepExecutor::new(config.timeouts.clone());
        let checker = AssertionChecker::new(
            config.timeouts.poll_interval_ms,
            config.timeouts.assertion_ms,
        );

        for (index, step) in flow.steps.iter().enumerate() {
            self.begin(flow, tracker, Phase::Step, index);
            match executor.execute(step, session, ctx).await? {
                StepOutcome::Completed => self.complete(flow, tracker, Phase::Step, index, None),
                StepOutcome::Degraded(note) => {
                    self.complete(flow, tracker, Phase::Step, index, Some(note))
                }
            }
        }

        for (index, assertion) in flow.assertions.iter().enumerate() {
            self.begin(flow, tracker, Phase::Assertion, index);
            match checker.check(assertion, session, ctx).await {
                AssertionOutcome::Passed => {
                    self.complete(flow, tracker, Phase::Assertion, index, None)
                }
                AssertionOutcome::Failed { expected, actual } => {
                    return Err(FlowError::AssertionFailed {
                        assertion: assertion.display_name(),
                        expected,
                        actual,
                    });
                }
            }
        }

        Ok(())
    }

    fn begin(&self, flow: &FlowDefinition, tracker: &Shared, phase: Phase, index: usize) {
        let display = tracker.with(|t| {
            let entry = t.entry(phase, index);
            entry.start();
            entry.display.clone()
        });
        self.emitter.emit(RunEvent::StepStarted {
            flow_name: flow.name.clone(),
            phase,
            index,
            display,
        });
    }

    fn complete(
        &self,
        flow: &FlowDefinition,
        tracker: &Shared,
        phase: Phase,
        index: usize,
        degraded: Option<String>,
    ) {
        let duration_ms = tracker.with(|t| {
            let entry = t.entry(phase, index);
            match degraded.clone() {
                Some(note) => entry.degrade(note),
                None => entry.pass(),
            }
            entry.duration_ms.unwrap_or(0)
        });
        let event = match degraded {
            Some(note) => RunEvent::StepDegraded {
                flow_name: flow.name.clone(),
                phase,
                index,
                note,
                duration_ms,
            },
            None => RunEvent::StepPassed {
                flow_name: flow.name.clone(),
                phase,
                index,
                duration_ms,
            },
        };
        self.emitter.emit(event);
    }

    fn finish(&self, flow: &FlowDefinition, tracker: Shared, started: Instant) -> RunResult {
        let tracker = tracker.into_inner();
        let outcome = tracker.outcome.unwrap_or_else(|| RunOutcome::Failed {
            error: FlowError::Cancelled,
            phase: Phase::Step,
            failing_index: None,
        });
        let result = RunResult {
            flow_name: flow.name.clone(),
            flow_path: None,
            outcome,
            steps: tracker.steps,
            assertions: tracker.assertions,
            transitions: tracker.transitions,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.emitter.emit(RunEvent::FlowFinished {
            flow_name: flow.name.clone(),
            passed: result.is_passed(),
            error: result.error().map(|e| e.to_string()),
            duration_ms: result.duration_ms,
        });
        result
    }
}

/// Close context, browser, driver in that order; errors are only logged
async fn teardown(flow_name: &str, session: &mut dyn BrowserSession) {
    if let Err(e) = session.close_context().await {
        warn!("Flow '{}': closing context failed: {:#}", flow_name, e);
    }
    if let Err(e) = session.close_browser().await {
        warn!("Flow '{}': closing browser failed: {:#}", flow_name, e);
    }
    if let Err(e) = session.stop().await {
        warn!("Flow '{}': stopping driver failed: {:#}", flow_name, e);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("panicked: {}", msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{career_journey, FakeElement, FakeLauncher, FakeScreen};
    use crate::parser::types::{Assertion, LoadState, Locator, Step, WaitUntil};
    use crate::runner::error::LocatorNotFound;
    use crate::runner::state::StepStatus;

    const HERO_CARD: &str = "html/body/div/div/div/div[3]/div";

    fn runner(launcher: &FakeLauncher) -> FlowRunner {
        let config = Config {
            base_url: Some("http://localhost:5173".to_string()),
            ..Config::default()
        };
        FlowRunner::new(Arc::new(launcher.clone()), config)
    }

    fn open_root() -> Vec<Step> {
        vec![
            Step::Navigate {
                url: "/".to_string(),
                wait_until: WaitUntil::Commit,
                timeout_ms: None,
            },
            Step::WaitForLoadState {
                state: LoadState::DomContentLoaded,
                timeout_ms: None,
            },
        ]
    }

    fn hero_to_career_map() -> FlowDefinition {
        let mut steps = open_root();
        steps.push(Step::Wait { duration_ms: 3000 });
        steps.push(Step::Click {
            locator: Locator::xpath(HERO_CARD).nth(0),
            timeout_ms: None,
        });
        steps.push(Step::Wait { duration_ms: 3000 });
        steps.push(Step::Click {
            locator: Locator::xpath(HERO_CARD).nth(0),
            timeout_ms: None,
        });
        FlowDefinition::new("hero-to-career-map")
            .with_steps(steps)
            .with_assertions(vec![
                Assertion::visible(Locator::text("CAREER PATH")),
                Assertion::visible(Locator::text("Data Engineer")),
            ])
    }

    fn statuses(result: &RunResult) -> Vec<&StepStatus> {
        result
            .steps
            .iter()
            .chain(result.assertions.iter())
            .map(|s| &s.status)
            .collect()
    }

    fn teardown_log(launcher: &FakeLauncher) -> Vec<String> {
        launcher
            .log()
            .into_iter()
            .filter(|e| matches!(e.as_str(), "close_context" | "close_browser" | "stop"))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hero_selection_reaches_career_map() {
        let launcher = career_journey();
        let result = runner(&launcher).run(&hero_to_career_map()).await;

        assert!(result.is_passed(), "{:?}", result.outcome);
        assert_eq!(
            result.transitions,
            vec![
                Lifecycle::Idle,
                Lifecycle::SessionStarting,
                Lifecycle::Running,
                Lifecycle::Passed,
                Lifecycle::TornDown,
            ]
        );
        assert!(statuses(&result)
            .iter()
            .all(|s| matches!(s, StepStatus::Passed)));
        assert_eq!(teardown_log(&launcher), vec!["close_context", "close_browser", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_career_map_hidden_after_initial_load() {
        let launcher = career_journey();
        let flow = FlowDefinition::new("no-career-map-yet")
            .with_steps(open_root())
            .with_assertions(vec![Assertion::hidden(Locator::text("Career Map"))]);

        let result = runner(&launcher).run(&flow).await;
        assert!(result.is_passed(), "{:?}", result.outcome);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_locator_fails_fast() {
        let launcher = career_journey();
        let mut steps = open_root();
        steps.push(Step::Click {
            locator: Locator::xpath("//nonexistent"),
            timeout_ms: None,
        });
        steps.push(Step::Click {
            locator: Locator::xpath(HERO_CARD),
            timeout_ms: None,
        });
        let flow = FlowDefinition::new("missing")
            .with_steps(steps)
            .with_assertions(vec![Assertion::visible(Locator::text("CAREER PATH"))]);

        let result = runner(&launcher).run(&flow).await;

        assert!(!result.is_passed());
        assert_eq!(result.failing_index(), Some(2));
        assert_eq!(result.phase(), Some(Phase::Step));
        assert_eq!(
            result.error(),
            Some(&FlowError::StepFailed {
                step: "click xpath=//nonexistent".to_string(),
                cause: StepCause::LocatorNotFound(LocatorNotFound {
                    locator: "xpath=//nonexistent".to_string(),
                    timeout_ms: 5000,
                    matches: 0,
                }),
            })
        );
        assert!(matches!(result.steps[3].status, StepStatus::Skipped { .. }));
        assert!(matches!(result.assertions[0].status, StepStatus::Skipped { .. }));
        assert!(!launcher.log().iter().any(|e| e.starts_with("click")));
        assert_eq!(teardown_log(&launcher), vec!["close_context", "close_browser", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failed_assertion_keeps_earlier_records() {
        let launcher = career_journey();
        let flow = FlowDefinition::new("assertions")
            .with_steps(open_root())
            .with_assertions(vec![
                Assertion::visible(Locator::text("Data Engineer")),
                Assertion::visible(Locator::text("Deployment Successful")).within(1000),
                Assertion::visible(Locator::text("Data Engineer")),
            ]);

        let result = runner(&launcher).run(&flow).await;

        assert_eq!(result.phase(), Some(Phase::Assertion));
        assert_eq!(result.failing_index(), Some(1));
        assert!(matches!(result.assertions[0].status, StepStatus::Passed));
        assert!(matches!(result.assertions[2].status, StepStatus::Skipped { .. }));
        assert!(matches!(
            result.error(),
            Some(FlowError::AssertionFailed { actual, .. }) if actual == "not found"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_failure_skips_running() {
        let launcher = career_journey().failing_startup();
        let result = runner(&launcher).run(&hero_to_career_map()).await;

        assert_eq!(result.phase(), Some(Phase::Session));
        assert_eq!(result.failing_index(), None);
        assert!(matches!(
            result.error(),
            Some(FlowError::SessionStartupFailed(msg)) if msg.contains("executable not found")
        ));
        assert_eq!(
            result.transitions,
            vec![Lifecycle::Idle, Lifecycle::SessionStarting, Lifecycle::TornDown]
        );
        assert!(launcher.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_step_still_tears_down() {
        let launcher = FakeLauncher::new()
            .screen(
                "crash",
                FakeScreen::new("http://localhost:5173/game/tower")
                    .with(FakeElement::new("DEPLOY").role("button").panics_on_click()),
            )
            .route("/game/tower", "crash");
        let flow = FlowDefinition::new("crash").with_steps(vec![
            Step::Navigate {
                url: "/game/tower".to_string(),
                wait_until: WaitUntil::Load,
                timeout_ms: None,
            },
            Step::Click {
                locator: Locator::role("button", Some("DEPLOY")),
                timeout_ms: None,
            },
        ]);

        let result = runner(&launcher).run(&flow).await;

        assert_eq!(result.failing_index(), Some(1));
        assert!(matches!(
            result.error(),
            Some(FlowError::StepFailed { cause: StepCause::Driver(msg), .. }) if msg.starts_with("panicked")
        ));
        assert_eq!(teardown_log(&launcher), vec!["close_context", "close_browser", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_state_timeout_continues() {
        let launcher = FakeLauncher::new()
            .screen(
                "slow",
                FakeScreen::new("http://localhost:5173/")
                    .ready_state("loading")
                    .with(FakeElement::new("CHOOSE YOUR HERO")),
            )
            .route("5173/", "slow");
        let flow = FlowDefinition::new("slow")
            .with_steps(open_root())
            .with_assertions(vec![Assertion::visible(Locator::text("CHOOSE YOUR HERO"))]);

        let result = runner(&launcher).run(&flow).await;

        assert!(result.is_passed(), "{:?}", result.outcome);
        assert!(matches!(result.steps[1].status, StepStatus::Degraded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_and_tears_down() {
        let launcher = career_journey();
        let flow = hero_to_career_map();

        let cancel = tokio::time::sleep(tokio::time::Duration::from_millis(1000));
        let result = runner(&launcher).run_until(&flow, cancel).await;

        assert_eq!(result.error(), Some(&FlowError::Cancelled));
        assert_eq!(result.failing_index(), Some(2));
        assert_eq!(teardown_log(&launcher), vec!["close_context", "close_browser", "stop"]);
        assert_eq!(result.transitions.last(), Some(&Lifecycle::TornDown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_flow_same_result_kind() {
        let launcher = career_journey();
        let runner = runner(&launcher);
        let first = runner.run(&hero_to_career_map()).await;
        let second = runner.run(&hero_to_career_map()).await;

        assert_eq!(first.is_passed(), second.is_passed());
        assert_eq!(launcher.launches(), 2);
    }
}
