//! Deployment records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline step names, in execution order.
pub const STEP_NAMES: [&str; 7] = [
    "sync", "install", "test", "build", "release", "nginx", "runtime",
];

/// Overall deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl DeploymentStatus {
    /// Terminal records are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

/// Per-step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// Status record for one pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// One deployment of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,

    pub project_id: String,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub dry_run: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// HEAD commit recorded by the sync step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Absolute path of the deployment log file
    pub log_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,
}

impl Deployment {
    /// New queued deployment with every step pending.
    pub fn queued(id: String, project_id: String, dry_run: bool, log_path: String) -> Self {
        let steps = STEP_NAMES
            .iter()
            .map(|name| (name.to_string(), StepRecord::pending()))
            .collect();

        Self {
            id,
            project_id,
            status: DeploymentStatus::Queued,
            dry_run,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            commit: None,
            log_path,
            error: None,
            steps,
        }
    }

    pub fn step_mut(&mut self, name: &str) -> &mut StepRecord {
        self.steps
            .entry(name.to_string())
            .or_insert_with(StepRecord::pending)
    }

    pub fn begin_step(&mut self, name: &str) {
        let step = self.step_mut(name);
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
    }

    pub fn end_step(&mut self, name: &str, status: StepStatus) {
        let step = self.step_mut(name);
        step.status = status;
        step.finished_at = Some(Utc::now());
    }

    pub fn fail_step(&mut self, name: &str, error: String) {
        let step = self.step_mut(name);
        step.status = StepStatus::Failed;
        step.finished_at = Some(Utc::now());
        step.error = Some(error);
    }
}
