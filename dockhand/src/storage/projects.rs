//! Project store
//!
//! One `deploy-config.json` per project directory. Reads normalize the env
//! list (see `models::project`); writes run the env formatting rules so
//! cleartext secret values never reach disk.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use crate::errors::DeployError;
use crate::filesys::{Dir, File};
use crate::models::project::{EnvEntry, Project, Runtime, Target};
use crate::secrets::SecretsCodec;
use crate::storage::layout::Layout;
use crate::validate;

/// Partial update payload for a project
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectUpdate {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub install_command: Option<String>,
    pub build_command: Option<String>,
    pub test_command: Option<String>,
    pub start_command: Option<String>,
    pub build_output: Option<String>,
    pub runtime: Option<Runtime>,
    pub deploy_path: Option<String>,
    pub domain: Option<String>,
    pub port: Option<u16>,
    pub target: Option<Target>,
    pub template_id: Option<String>,
    pub env: Option<Vec<EnvEntry>>,
}

pub struct ProjectStore {
    layout: Arc<Layout>,
    codec: Arc<SecretsCodec>,
}

impl ProjectStore {
    pub fn new(layout: Arc<Layout>, codec: Arc<SecretsCodec>) -> Self {
        Self { layout, codec }
    }

    fn config_file(&self, project_id: &str) -> File {
        File::new(self.layout.project_config(project_id))
    }

    pub async fn exists(&self, project_id: &str) -> bool {
        self.config_file(project_id).exists().await
    }

    pub async fn get(&self, project_id: &str) -> Result<Project, DeployError> {
        let file = self.config_file(project_id);
        if !file.exists().await {
            return Err(DeployError::NotFound(format!("project {project_id}")));
        }
        file.read_json().await
    }

    /// Create a new project, its directories included.
    pub async fn create(&self, mut project: Project) -> Result<Project, DeployError> {
        if self.exists(&project.id).await {
            return Err(DeployError::AlreadyExists(format!(
                "project {}",
                project.id
            )));
        }

        project.env = self.format_env(&[], project.env)?;
        self.layout.setup_project(&project.id).await?;
        self.save(&project).await?;
        Ok(project)
    }

    pub async fn save(&self, project: &Project) -> Result<(), DeployError> {
        self.config_file(&project.id).write_json(project).await
    }

    /// List every project, silently skipping unparseable records.
    pub async fn list(&self) -> Result<Vec<Project>, DeployError> {
        let dir = Dir::new(self.layout.projects_dir());
        if !dir.exists().await {
            return Ok(Vec::new());
        }

        let mut projects = Vec::new();
        for path in dir.list_dirs().await? {
            let config = File::new(path.join("deploy-config.json"));
            if !config.exists().await {
                continue;
            }
            match config.read_json::<Project>().await {
                Ok(project) => projects.push(project),
                Err(e) => {
                    warn!("Skipping unparseable project record {:?}: {}", path, e);
                }
            }
        }

        Ok(projects)
    }

    /// Apply a partial update, running the env formatting rules.
    pub async fn apply_update(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> Result<Project, DeployError> {
        let mut project = self.get(project_id).await?;

        if let Some(repo) = update.repo {
            project.repo = repo;
        }
        if let Some(branch) = update.branch {
            project.branch = branch;
        }
        if let Some(cmd) = update.install_command {
            project.install_command = Some(cmd);
        }
        if let Some(cmd) = update.build_command {
            project.build_command = Some(cmd);
        }
        if let Some(cmd) = update.test_command {
            project.test_command = Some(cmd);
        }
        if let Some(cmd) = update.start_command {
            project.start_command = Some(cmd);
        }
        if let Some(output) = update.build_output {
            project.build_output = Some(output);
        }
        if let Some(runtime) = update.runtime {
            project.runtime = runtime;
        }
        if let Some(path) = update.deploy_path {
            project.deploy_path = path;
        }
        if let Some(domain) = update.domain {
            project.domain = Some(domain);
        }
        if let Some(port) = update.port {
            project.port = Some(port);
        }
        if let Some(target) = update.target {
            project.target = target;
        }
        if let Some(template_id) = update.template_id {
            project.template_id = Some(template_id);
        }
        if let Some(env) = update.env {
            validate::validate_env_entries(&env)?;
            validate::reject_secret_downgrade(&project.env, &env)?;
            project.env = self.format_env(&project.env, env)?;
        }

        project.updated_at = Utc::now();
        self.save(&project).await?;
        Ok(project)
    }

    /// Env formatting on write: encrypt fresh secret values, reuse stored
    /// ciphertexts when no new value came in, strip cleartext from secret
    /// entries.
    fn format_env(
        &self,
        existing: &[EnvEntry],
        incoming: Vec<EnvEntry>,
    ) -> Result<Vec<EnvEntry>, DeployError> {
        incoming
            .into_iter()
            .map(|mut entry| {
                if entry.is_secret {
                    if let Some(value) = entry.value.take() {
                        entry.encrypted_value = Some(self.codec.encrypt(&value)?);
                    } else if entry.encrypted_value.is_none() {
                        let stored = existing
                            .iter()
                            .find(|e| e.key == entry.key)
                            .and_then(|e| e.encrypted_value.clone());
                        match stored {
                            Some(blob) => entry.encrypted_value = Some(blob),
                            None => {
                                return Err(DeployError::SecretMissingValue(entry.key.clone()))
                            }
                        }
                    }
                } else {
                    entry.encrypted_value = None;
                }
                Ok(entry)
            })
            .collect()
    }

    /// Runtime ports already assigned across all projects.
    pub async fn used_runtime_ports(&self) -> Result<Vec<u16>, DeployError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter_map(|p| p.runtime_port)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ProjectStore) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Arc::new(Layout::new(
            tmp.path().join("projects"),
            tmp.path().join("logs"),
            "releases",
        ));
        let codec = Arc::new(SecretsCodec::new(Some("project-store-test-key")));
        (tmp, ProjectStore::new(layout, codec))
    }

    fn project(id: &str) -> Project {
        Project {
            id: id.into(),
            repo: "https://github.com/acme/site.git".into(),
            branch: "main".into(),
            install_command: None,
            build_command: Some("npm run build".into()),
            test_command: None,
            start_command: None,
            build_output: Some("build".into()),
            runtime: Runtime::Static,
            deploy_path: "/var/www/site".into(),
            domain: None,
            port: None,
            target: Target::Server,
            owner_id: "admin".into(),
            template_id: None,
            env: Vec::new(),
            runtime_port: None,
            last_deploy: None,
            last_commit: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_get_round_trip() {
        let (_tmp, store) = store();
        store.create(project("site")).await.unwrap();

        let loaded = store.get("site").await.unwrap();
        assert_eq!(loaded.id, "site");
        assert_eq!(loaded.build_command.as_deref(), Some("npm run build"));

        assert!(matches!(
            store.get("missing").await,
            Err(DeployError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate() {
        let (_tmp, store) = store();
        store.create(project("site")).await.unwrap();
        assert!(matches!(
            store.create(project("site")).await,
            Err(DeployError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_secret_values_encrypted_on_create() {
        let (_tmp, store) = store();
        let mut p = project("site");
        p.env = vec![EnvEntry {
            key: "API_KEY".into(),
            is_secret: true,
            value: Some("cleartext".into()),
            encrypted_value: None,
        }];

        let created = store.create(p).await.unwrap();
        assert!(created.env[0].value.is_none());
        let blob = created.env[0].encrypted_value.as_ref().unwrap();
        assert_ne!(blob, "cleartext");

        // Nothing on disk carries the cleartext.
        let raw = tokio::fs::read_to_string(store.layout.project_config("site"))
            .await
            .unwrap();
        assert!(!raw.contains("cleartext"));
    }

    #[tokio::test]
    async fn test_update_reuses_stored_ciphertext() {
        let (_tmp, store) = store();
        let mut p = project("site");
        p.env = vec![EnvEntry {
            key: "API_KEY".into(),
            is_secret: true,
            value: Some("original".into()),
            encrypted_value: None,
        }];
        let created = store.create(p).await.unwrap();
        let original_blob = created.env[0].encrypted_value.clone().unwrap();

        // Update that resends the secret entry without a new value.
        let update = ProjectUpdate {
            env: Some(vec![EnvEntry {
                key: "API_KEY".into(),
                is_secret: true,
                value: None,
                encrypted_value: None,
            }]),
            ..Default::default()
        };
        let updated = store.apply_update("site", update).await.unwrap();
        assert_eq!(updated.env[0].encrypted_value.as_ref(), Some(&original_blob));
    }

    #[tokio::test]
    async fn test_update_rejects_secret_downgrade() {
        let (_tmp, store) = store();
        let mut p = project("site");
        p.env = vec![EnvEntry {
            key: "API_KEY".into(),
            is_secret: true,
            value: Some("original".into()),
            encrypted_value: None,
        }];
        store.create(p).await.unwrap();

        let update = ProjectUpdate {
            env: Some(vec![EnvEntry {
                key: "API_KEY".into(),
                is_secret: false,
                value: Some("plain now".into()),
                encrypted_value: None,
            }]),
            ..Default::default()
        };
        assert!(matches!(
            store.apply_update("site", update).await,
            Err(DeployError::SecretDowngrade(_))
        ));

        // Stored record unchanged.
        let stored = store.get("site").await.unwrap();
        assert!(stored.env[0].is_secret);
    }

    #[tokio::test]
    async fn test_list_skips_unparseable_records() {
        let (_tmp, store) = store();
        store.create(project("good")).await.unwrap();

        let bad_dir = store.layout.project_dir("bad");
        tokio::fs::create_dir_all(&bad_dir).await.unwrap();
        tokio::fs::write(bad_dir.join("deploy-config.json"), "{ not json")
            .await
            .unwrap();

        let projects = store.list().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, "good");
    }
}
