use thiserror::Error;

/// A locator did not produce its target match before the timeout elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("locator not found after {timeout_ms}ms: {locator} ({matches} match(es) observed)")]
pub struct LocatorNotFound {
    pub locator: String,
    pub timeout_ms: u64,
    /// Matches seen on the last poll across the searched frames
    pub matches: usize,
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepCause {
    #[error(transparent)]
    LocatorNotFound(#[from] LocatorNotFound),

    #[error("element not actionable within {timeout_ms}ms ({state}): {locator}")]
    NotActionable {
        locator: String,
        timeout_ms: u64,
        state: String,
    },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("driver error: {0}")]
    Driver(String),
}

/// Flow-level failure taxonomy carried by a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error(transparent)]
    LocatorNotFound(#[from] LocatorNotFound),

    #[error("step '{step}' failed: {cause}")]
    StepFailed { step: String, cause: StepCause },

    #[error("assertion '{assertion}' failed: expected {expected}, got {actual}")]
    AssertionFailed {
        assertion: String,
        expected: String,
        actual: String,
    },

    #[error("browser session could not be started: {0}")]
    SessionStartupFailed(String),

    #[error("run cancelled")]
    Cancelled,
}

impl FlowError {
    pub fn step(step: &str, cause: StepCause) -> Self {
        FlowError::StepFailed {
            step: step.to_string(),
            cause,
        }
    }

    /// True when the root cause is an unresolved locator
    pub fn is_locator_not_found(&self) -> bool {
        matches!(
            self,
            FlowError::LocatorNotFound(_)
                | FlowError::StepFailed {
                    cause: StepCause::LocatorNotFound(_),
                    ..
                }
        )
    }

    /// Short category name used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::LocatorNotFound(_) => "LocatorNotFound",
            FlowError::StepFailed { .. } => "StepFailed",
            FlowError::AssertionFailed { .. } => "AssertionFailed",
            FlowError::SessionStartupFailed(_) => "SessionStartupFailed",
            FlowError::Cancelled => "Cancelled",
        }
    }
}
