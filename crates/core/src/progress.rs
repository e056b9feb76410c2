use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::outcome::{RunOutcomes, StreamOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPlan {
    pub target: PathBuf,
    pub streams: usize,
    pub total_bytes: u64,
    pub total_consumers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePlan {
    pub source: PathBuf,
    pub streams: Vec<String>,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    BackupPlanned {
        plan: BackupPlan,
    },
    StreamStarted {
        stream: String,
    },
    StreamFinished {
        #[serde(flatten)]
        outcome: StreamOutcome,
    },
    BackupSummary {
        outcomes: RunOutcomes,
        failed: bool,
    },
    RestorePlanned {
        plan: RestorePlan,
    },
    StreamRestored {
        stream: String,
        messages: u64,
        consumers: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}
