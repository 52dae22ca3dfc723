use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::error::FlowError;

/// Flow runner lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    Idle,
    SessionStarting,
    Running,
    Passed,
    Failed,
    TornDown,
}

/// Where in a flow a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Session,
    Step,
    Assertion,
}

/// Step or assertion execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Degraded { note: String },
    Failed { error: String },
    Skipped { reason: String },
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

/// State for a single step or assertion
#[derive(Debug, Clone)]
pub struct StepState {
    pub index: usize,
    pub phase: Phase,
    pub display: String,
    pub status: StepStatus,
    pub started_at: Option<Instant>,
    pub duration_ms: Option<u64>,
}

impl StepState {
    pub fn new(index: usize, phase: Phase, display: &str) -> Self {
        Self {
            index,
            phase,
            display: display.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            duration_ms: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Instant::now());
    }

    pub fn pass(&mut self) {
        self.finish(StepStatus::Passed);
    }

    pub fn degrade(&mut self, note: String) {
        self.finish(StepStatus::Degraded { note });
    }

    pub fn fail(&mut self, error: String) {
        self.finish(StepStatus::Failed { error });
    }

    pub fn skip(&mut self, reason: &str) {
        self.status = StepStatus::Skipped {
            reason: reason.to_string(),
        };
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        if let Some(start) = self.started_at {
            self.duration_ms = Some(start.elapsed().as_millis() as u64);
        }
    }

    pub fn to_report(&self) -> StepRecord {
        StepRecord {
            index: self.index,
            phase: self.phase,
            display: self.display.clone(),
            status: self.status.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub index: usize,
    pub phase: Phase,
    pub display: String,
    pub status: StepStatus,
    pub duration_ms: Option<u64>,
}

/// Outcome of one flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed {
        error: FlowError,
        phase: Phase,
        /// Index of the failing step or assertion within its phase
        failing_index: Option<usize>,
    },
}

/// Everything one `FlowRunner::run` produced
#[derive(Debug, Clone)]
pub struct RunResult {
    pub flow_name: String,
    pub flow_path: Option<String>,
    pub outcome: RunOutcome,
    pub steps: Vec<StepState>,
    pub assertions: Vec<StepState>,
    pub transitions: Vec<Lifecycle>,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn is_passed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Passed)
    }

    pub fn error(&self) -> Option<&FlowError> {
        match &self.outcome {
            RunOutcome::Passed => None,
            RunOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn failing_index(&self) -> Option<usize> {
        match &self.outcome {
            RunOutcome::Passed => None,
            RunOutcome::Failed { failing_index, .. } => *failing_index,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match &self.outcome {
            RunOutcome::Passed => None,
            RunOutcome::Failed { phase, .. } => Some(*phase),
        }
    }

    pub fn to_report(&self) -> FlowReport {
        FlowReport {
            flow_name: self.flow_name.clone(),
            flow_path: self.flow_path.clone().unwrap_or_default(),
            status: if self.is_passed() {
                FlowStatus::Passed
            } else {
                FlowStatus::Failed
            },
            phase: self.phase(),
            failing_index: self.failing_index(),
            error_kind: self.error().map(|e| e.kind().to_string()),
            error: self.error().map(|e| e.to_string()),
            steps: self.steps.iter().map(|s| s.to_report()).collect(),
            assertions: self.assertions.iter().map(|s| s.to_report()).collect(),
            total_duration_ms: Some(self.duration_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub flow_name: String,
    pub flow_path: String,
    pub status: FlowStatus,
    pub phase: Option<Phase>,
    pub failing_index: Option<usize>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
    pub assertions: Vec<StepRecord>,
    pub total_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub session_id: String,
    pub total_flows: u32,
    pub passed: u32,
    pub failed: u32,
    pub total_steps: u32,
    pub total_duration_ms: Option<u64>,
}

impl RunSummary {
    pub fn from_results(session_id: &str, results: &[RunResult], total_duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.is_passed()).count() as u32;
        Self {
            session_id: session_id.to_string(),
            total_flows: results.len() as u32,
            passed,
            failed: results.len() as u32 - passed,
            total_steps: results
                .iter()
                .map(|r| (r.steps.len() + r.assertions.len()) as u32)
                .sum(),
            total_duration_ms: Some(total_duration_ms),
        }
    }
}

/// Mutable record of one flow while it runs
#[derive(Debug)]
pub struct RunTracker {
    pub steps: Vec<StepState>,
    pub assertions: Vec<StepState>,
    pub transitions: Vec<Lifecycle>,
    pub outcome: Option<RunOutcome>,
}

impl RunTracker {
    pub fn new(steps: Vec<StepState>, assertions: Vec<StepState>) -> Self {
        Self {
            steps,
            assertions,
            transitions: vec![Lifecycle::Idle],
            outcome: None,
        }
    }

    pub fn transition(&mut self, to: Lifecycle) {
        self.transitions.push(to);
    }

    pub fn entry(&mut self, phase: Phase, index: usize) -> &mut StepState {
        match phase {
            Phase::Assertion => &mut self.assertions[index],
            _ => &mut self.steps[index],
        }
    }

    /// First step or assertion that has not finished
    pub fn current(&self) -> Option<(Phase, usize)> {
        self.steps
            .iter()
            .chain(self.assertions.iter())
            .find(|s| !s.status.is_terminal())
            .map(|s| (s.phase, s.index))
    }

    /// Record `error` against the unfinished entry, skip everything after it
    pub fn fail_current(&mut self, error: FlowError) {
        let (phase, failing_index) = match self.current() {
            Some((phase, index)) => {
                self.entry(phase, index).fail(error.to_string());
                (phase, Some(index))
            }
            None => (Phase::Step, None),
        };

        for entry in self.steps.iter_mut().chain(self.assertions.iter_mut()) {
            if !entry.status.is_terminal() {
                entry.skip("previous failure");
            }
        }

        self.outcome = Some(RunOutcome::Failed {
            error,
            phase,
            failing_index,
        });
    }

    /// Startup failure: nothing ran
    pub fn fail_session(&mut self, error: FlowError) {
        for entry in self.steps.iter_mut().chain(self.assertions.iter_mut()) {
            entry.skip("session not started");
        }
        self.outcome = Some(RunOutcome::Failed {
            error,
            phase: Phase::Session,
            failing_index: None,
        });
    }
}
