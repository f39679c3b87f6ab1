//! Deployment store
//!
//! One JSON file per deployment under its project directory, plus a global
//! `.deployments-index.json` mapping deployment id to project id so lookups
//! by deployment id stay a single file read. The index is read-modify-write
//! and guarded by a process-wide lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::DeployError;
use crate::filesys::{Dir, File};
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::storage::layout::Layout;

pub struct DeploymentStore {
    layout: Arc<Layout>,
    index_lock: Mutex<()>,
}

impl DeploymentStore {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self {
            layout,
            index_lock: Mutex::new(()),
        }
    }

    fn record_file(&self, project_id: &str, deployment_id: &str) -> File {
        File::new(self.layout.deployment_file(project_id, deployment_id))
    }

    /// Persist a new deployment and register it in the index.
    pub async fn create(&self, deployment: &Deployment) -> Result<(), DeployError> {
        self.record_file(&deployment.project_id, &deployment.id)
            .write_json(deployment)
            .await?;
        self.index_insert(&deployment.id, &deployment.project_id)
            .await?;
        Ok(())
    }

    /// Persist an updated deployment. Terminal records are immutable.
    pub async fn save(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let file = self.record_file(&deployment.project_id, &deployment.id);
        if file.exists().await {
            let stored: Deployment = file.read_json().await?;
            if stored.status.is_terminal() {
                return Err(DeployError::Conflict(format!(
                    "deployment {} is already {:?}",
                    deployment.id, stored.status
                )));
            }
        }
        file.write_json(deployment).await
    }

    pub async fn get(&self, deployment_id: &str) -> Result<Deployment, DeployError> {
        let project_id = self.project_of(deployment_id).await?;
        let file = self.record_file(&project_id, deployment_id);
        if !file.exists().await {
            return Err(DeployError::NotFound(format!(
                "deployment {deployment_id}"
            )));
        }
        file.read_json().await
    }

    /// Project owning a deployment, via the index.
    pub async fn project_of(&self, deployment_id: &str) -> Result<String, DeployError> {
        let index = self.read_index().await?;
        index
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| DeployError::NotFound(format!("deployment {deployment_id}")))
    }

    /// Deployments of a project, newest first.
    pub async fn list_for_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<Deployment>, DeployError> {
        let dir = Dir::new(self.layout.deployments_dir(project_id));
        if !dir.exists().await {
            return Ok(Vec::new());
        }

        let mut deployments = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match File::new(&path).read_json::<Deployment>().await {
                Ok(dep) => deployments.push(dep),
                Err(e) => warn!("Skipping unparseable deployment record {:?}: {}", path, e),
            }
        }

        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deployments.truncate(limit);
        Ok(deployments)
    }

    /// Whether the project has a deployment that is queued or running.
    pub async fn has_active(&self, project_id: &str) -> Result<bool, DeployError> {
        let deployments = self.list_for_project(project_id, usize::MAX).await?;
        Ok(deployments
            .iter()
            .any(|d| matches!(d.status, DeploymentStatus::Queued | DeploymentStatus::Running)))
    }

    async fn read_index(&self) -> Result<HashMap<String, String>, DeployError> {
        let file = File::new(self.layout.deployments_index());
        if !file.exists().await {
            return Ok(HashMap::new());
        }
        file.read_json().await
    }

    async fn index_insert(&self, deployment_id: &str, project_id: &str) -> Result<(), DeployError> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        index.insert(deployment_id.to_string(), project_id.to_string());
        File::new(self.layout.deployments_index())
            .write_json(&index)
            .await
    }
}
