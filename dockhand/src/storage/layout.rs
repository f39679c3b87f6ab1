//! Storage layout
//!
//! All on-disk paths derive from here:
//!
//! ```text
//! <projects_dir>/<projectId>/
//!   deploy-config.json
//!   repo/
//!   releases/<ts>-<sha7>/
//!   current  -> releases/<ts>-<sha7>
//!   previous -> releases/<ts-1>-<sha7>
//!   deployments/<deploymentId>.json
//! <logs_dir>/<projectId>/<deploymentId>.log
//! <projects_dir>/.deployments-index.json
//! ```

use std::path::{Path, PathBuf};

use crate::errors::DeployError;
use crate::filesys::Dir;

#[derive(Debug, Clone)]
pub struct Layout {
    projects_dir: PathBuf,
    logs_dir: PathBuf,
    releases_dir_name: String,
}

impl Layout {
    pub fn new(
        projects_dir: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        releases_dir_name: impl Into<String>,
    ) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            logs_dir: logs_dir.into(),
            releases_dir_name: releases_dir_name.into(),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir.join(project_id)
    }

    pub fn project_config(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("deploy-config.json")
    }

    pub fn repo_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("repo")
    }

    pub fn releases_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(&self.releases_dir_name)
    }

    pub fn release_dir(&self, project_id: &str, release: &str) -> PathBuf {
        self.releases_dir(project_id).join(release)
    }

    pub fn current_link(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("current")
    }

    pub fn previous_link(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("previous")
    }

    pub fn deployments_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("deployments")
    }

    pub fn deployment_file(&self, project_id: &str, deployment_id: &str) -> PathBuf {
        self.deployments_dir(project_id)
            .join(format!("{deployment_id}.json"))
    }

    pub fn deployments_index(&self) -> PathBuf {
        self.projects_dir.join(".deployments-index.json")
    }

    pub fn users_file(&self) -> PathBuf {
        self.projects_dir.join(".users.json")
    }

    pub fn templates_file(&self) -> PathBuf {
        self.projects_dir.join("templates.json")
    }

    pub fn log_file(&self, project_id: &str, deployment_id: &str) -> PathBuf {
        self.logs_dir
            .join(project_id)
            .join(format!("{deployment_id}.log"))
    }

    /// Create the top-level directories.
    pub async fn setup(&self) -> Result<(), DeployError> {
        Dir::new(&self.projects_dir).create().await?;
        Dir::new(&self.logs_dir).create().await?;
        Ok(())
    }

    /// Create the per-project directories.
    pub async fn setup_project(&self, project_id: &str) -> Result<(), DeployError> {
        Dir::new(self.project_dir(project_id)).create().await?;
        Dir::new(self.releases_dir(project_id)).create().await?;
        Dir::new(self.deployments_dir(project_id)).create().await?;
        Dir::new(self.logs_dir.join(project_id)).create().await?;
        Ok(())
    }
}
