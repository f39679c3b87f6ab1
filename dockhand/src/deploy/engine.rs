//! Pipeline engine
//!
//! Bounded FIFO admission, worker dispatch up to the concurrency limit, and
//! the rollback path. Queue state lives in process memory behind one mutex;
//! admission reserves its slot under that lock before the queued record is
//! written, so `active + queued` never exceeds the bound.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::deploy::nginx::NginxWriter;
use crate::deploy::pm2::Pm2;
use crate::deploy::release;
use crate::deploy::runner::DeployLog;
use crate::deploy::steps;
use crate::errors::DeployError;
use crate::models::deployment::Deployment;
use crate::models::project::{Project, Runtime};
use crate::secrets::{build_env, SecretsCodec};
use crate::storage::deployments::DeploymentStore;
use crate::storage::layout::Layout;
use crate::storage::projects::ProjectStore;
use crate::storage::templates::TemplateStore;

/// Runtime ports are assigned from this half-open range.
const RUNTIME_PORT_RANGE: std::ops::Range<u16> = 4000..5000;

/// Engine concurrency bounds
#[derive(Debug, Clone)]
pub struct Options {
    /// Parallel pipeline workers (minimum 1)
    pub max_concurrent_deploys: usize,

    /// Admitted jobs, active included (minimum 1)
    pub max_queue_size: usize,

    /// Build output used when a project does not name one
    pub default_build_output: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent_deploys: 1,
            max_queue_size: 50,
            default_build_output: "build".to_string(),
        }
    }
}

/// A queued pipeline job
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub deployment_id: String,
    pub project_id: String,
    pub dry_run: bool,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Job>,
    active: usize,
    /// Admission slots held between the bound check and the record write
    reserved: usize,
}

impl QueueState {
    fn admitted(&self) -> usize {
        self.queue.len() + self.active + self.reserved
    }
}

/// Commands a pipeline actually runs, after template resolution
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedCommands {
    pub install: Option<String>,
    pub test: Option<String>,
    pub build: Option<String>,
    pub start: Option<String>,
}

pub struct Engine {
    pub(crate) options: Options,
    pub(crate) layout: Arc<Layout>,
    pub(crate) projects: Arc<ProjectStore>,
    pub(crate) deployments: Arc<DeploymentStore>,
    pub(crate) templates: Arc<TemplateStore>,
    pub(crate) codec: Arc<SecretsCodec>,
    pub(crate) nginx: NginxWriter,
    pub(crate) pm2: Pm2,
    queue: StdMutex<QueueState>,
    promote_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn lock_recovering<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: Options,
        layout: Arc<Layout>,
        projects: Arc<ProjectStore>,
        deployments: Arc<DeploymentStore>,
        templates: Arc<TemplateStore>,
        codec: Arc<SecretsCodec>,
        nginx: NginxWriter,
        pm2: Pm2,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            layout,
            projects,
            deployments,
            templates,
            codec,
            nginx,
            pm2,
            queue: StdMutex::new(QueueState::default()),
            promote_locks: StdMutex::new(HashMap::new()),
        })
    }

    /// Validate the project, check the admission bound, persist a queued
    /// deployment record and dispatch.
    ///
    /// Either the queued record is written and the deployment is admitted, or
    /// an error is returned and nothing is persisted.
    pub async fn enqueue(
        self: &Arc<Self>,
        project_id: &str,
        dry_run: bool,
    ) -> Result<Deployment, DeployError> {
        let project = self.projects.get(project_id).await?;
        self.precheck(&project).await?;

        {
            let mut queue = lock_recovering(&self.queue);
            if queue.admitted() >= self.options.max_queue_size {
                return Err(DeployError::QueueFull);
            }
            queue.reserved += 1;
        }

        let deployment_id = Uuid::new_v4().to_string();
        let log_path = self
            .layout
            .log_file(project_id, &deployment_id)
            .to_string_lossy()
            .into_owned();
        let deployment = Deployment::queued(
            deployment_id.clone(),
            project_id.to_string(),
            dry_run,
            log_path,
        );

        if let Err(e) = self.deployments.create(&deployment).await {
            lock_recovering(&self.queue).reserved -= 1;
            return Err(e);
        }

        {
            let mut queue = lock_recovering(&self.queue);
            queue.reserved -= 1;
            queue.queue.push_back(Job {
                deployment_id,
                project_id: project_id.to_string(),
                dry_run,
            });
        }

        info!(
            "Queued deployment {} for project {} (dry_run: {})",
            deployment.id, project_id, dry_run
        );
        self.dispatch();
        Ok(deployment)
    }

    /// Start workers for queued jobs while capacity remains. Non-blocking and
    /// safe to call from any task; runs on enqueue and on worker completion.
    pub(crate) fn dispatch(self: &Arc<Self>) {
        loop {
            let job = {
                let mut queue = lock_recovering(&self.queue);
                if queue.active >= self.options.max_concurrent_deploys {
                    return;
                }
                match queue.queue.pop_front() {
                    Some(job) => {
                        queue.active += 1;
                        job
                    }
                    None => return,
                }
            };

            let engine = self.clone();
            tokio::spawn(async move {
                steps::run_pipeline(engine.clone(), job).await;
                lock_recovering(&engine.queue).active -= 1;
                engine.dispatch();
            });
        }
    }

    /// Current (active, queued) counts.
    pub fn queue_depth(&self) -> (usize, usize) {
        let queue = lock_recovering(&self.queue);
        (queue.active, queue.queue.len() + queue.reserved)
    }

    /// Per-project lock held across symlink promotion.
    pub(crate) fn promote_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = lock_recovering(&self.promote_locks);
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Pre-flight checks run before a deployment is admitted.
    async fn precheck(&self, project: &Project) -> Result<(), DeployError> {
        if project.repo.trim().is_empty() {
            return Err(DeployError::Validation(
                "project has no repository URL".to_string(),
            ));
        }
        crate::validate::validate_branch(&project.branch)?;
        crate::validate::validate_deploy_path(self.nginx.root(), &project.deploy_path)?;

        let resolved = self.resolve_commands(project).await?;
        if resolved.build.is_none() {
            return Err(DeployError::ConfigIncomplete(
                "buildCommand is required to deploy".to_string(),
            ));
        }
        if project.runtime == Runtime::Node && resolved.start.is_none() {
            return Err(DeployError::ConfigIncomplete(
                "startCommand is required for the node runtime".to_string(),
            ));
        }
        Ok(())
    }

    /// Commands for a project: template-owned projects use the template's
    /// commands exclusively; only admin-owned projects may run their own.
    pub(crate) async fn resolve_commands(
        &self,
        project: &Project,
    ) -> Result<ResolvedCommands, DeployError> {
        if let Some(template_id) = &project.template_id {
            let template = self.templates.get(template_id).await.map_err(|_| {
                DeployError::ConfigIncomplete(format!(
                    "command template {template_id} does not exist"
                ))
            })?;
            return Ok(ResolvedCommands {
                install: template.install_command,
                test: template.test_command,
                build: template.build_command,
                start: template.start_command,
            });
        }

        if !project.is_admin_owned() {
            return Err(DeployError::ConfigIncomplete(
                "projects not owned by admin must reference a command template".to_string(),
            ));
        }

        Ok(ResolvedCommands {
            install: project.install_command.clone(),
            test: project.test_command.clone(),
            build: project.build_command.clone(),
            start: project.start_command.clone(),
        })
    }

    /// First free runtime port across all stored projects.
    pub(crate) async fn allocate_runtime_port(&self) -> Result<u16, DeployError> {
        let used: HashSet<u16> = self
            .projects
            .used_runtime_ports()
            .await?
            .into_iter()
            .collect();
        RUNTIME_PORT_RANGE
            .clone()
            .find(|port| !used.contains(port))
            .ok_or_else(|| {
                DeployError::ConfigIncomplete("no free runtime port left in 4000-4999".to_string())
            })
    }

    /// Roll the project back to its previous release and rewire nginx/pm2.
    ///
    /// No deployment record is created; this mutates the live pointer only.
    pub async fn rollback(&self, project_id: &str) -> Result<(), DeployError> {
        let project = self.projects.get(project_id).await?;
        let resolved = self.resolve_commands(&project).await?;

        let built = build_env(&project.env, &self.codec)?;
        let mut env = built.merged();
        if let (Runtime::Node, Some(port)) = (project.runtime, project.runtime_port) {
            env.insert("PORT".to_string(), port.to_string());
        }

        let log = DeployLog::create(
            &self.layout.log_file(project_id, "rollback"),
            project.secret_keys(),
        )
        .await?;

        let lock = self.promote_lock(project_id);
        {
            let _guard = lock.lock().await;
            release::rollback_pointers(&self.layout, self.nginx.root(), &project, &log).await?;
        }

        self.nginx
            .install(&project, project.runtime_port, &log, false)
            .await?;

        if project.runtime == Runtime::Node && resolved.start.is_some() {
            self.pm2.restart(project_id, &env, &log, false).await?;
        }

        info!("Rolled back project {}", project_id);
        Ok(())
    }

    pub(crate) fn repo_dir(&self, project_id: &str) -> std::path::PathBuf {
        self.layout.repo_dir(project_id)
    }

    pub(crate) fn nginx_root(&self) -> &Path {
        self.nginx.root()
    }
}
