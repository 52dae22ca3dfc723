use crate::runner::state::{FlowReport, RunSummary};
use serde::{Deserialize, Serialize};

/// Results of one batch run, as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub session_id: String,
    pub flows: Vec<FlowReport>,
    pub summary: RunSummary,
    pub generated_at: String,
}

impl RunReport {
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}
