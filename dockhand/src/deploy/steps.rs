//! The pipeline step machine
//!
//! Seven steps in fixed order: sync, install, test, build, release, nginx,
//! runtime. Each records running -> success/failed on the deployment; the
//! first failure stops the pipeline. The child env (secrets included) is
//! built before any subprocess spawns, so a decryption failure fails the
//! deployment before the sync step touches git.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::deploy::engine::{Engine, Job};
use crate::deploy::git;
use crate::deploy::release;
use crate::deploy::runner::{run_shell, DeployLog, RunOptions};
use crate::errors::DeployError;
use crate::models::deployment::{Deployment, DeploymentStatus, StepStatus};
use crate::models::project::Runtime;
use crate::secrets::build_env;

pub(crate) async fn run_pipeline(engine: Arc<Engine>, job: Job) {
    if let Err(e) = execute(&engine, &job).await {
        error!("Deployment {} worker error: {}", job.deployment_id, e);
    }
}

async fn execute(engine: &Arc<Engine>, job: &Job) -> Result<(), DeployError> {
    let mut dep = engine.deployments.get(&job.deployment_id).await?;
    dep.status = DeploymentStatus::Running;
    dep.started_at = Some(Utc::now());
    engine.deployments.save(&dep).await?;

    let mut project = match engine.projects.get(&job.project_id).await {
        Ok(p) => p,
        Err(e) => return fail(engine, &mut dep, None, e, None).await,
    };

    // The redaction key list only needs the secret key names, so the log can
    // exist before decryption is attempted.
    let log = DeployLog::create(Path::new(&dep.log_path), project.secret_keys()).await?;
    log.line(&format!("Deploying {} ({})", project.id, dep.id))
        .await?;
    if dep.dry_run {
        log.line("Dry run: commands are logged, nothing is executed")
            .await?;
    }

    let resolved = match engine.resolve_commands(&project).await {
        Ok(r) => r,
        Err(e) => return fail(engine, &mut dep, None, e, Some(&log)).await,
    };

    let built = match build_env(&project.env, &engine.codec) {
        Ok(b) => b,
        Err(e) => return fail(engine, &mut dep, None, e, Some(&log)).await,
    };
    let mut env = built.merged();

    let repo_dir = engine.repo_dir(&project.id);

    // sync
    begin(engine, &mut dep, "sync").await?;
    if let Err(e) =
        git::sync_repository(&project.repo, &project.branch, &repo_dir, &log, dep.dry_run).await
    {
        return fail(engine, &mut dep, Some("sync"), e, Some(&log)).await;
    }
    if !dep.dry_run {
        match git::head_commit(&repo_dir, &log).await {
            Ok(sha) => dep.commit = Some(sha),
            Err(e) => return fail(engine, &mut dep, Some("sync"), e, Some(&log)).await,
        }
    }
    finish_step(engine, &mut dep, "sync", StepStatus::Success).await?;

    // install
    begin(engine, &mut dep, "install").await?;
    let install_cmd = match &resolved.install {
        Some(cmd) => Some(cmd.clone()),
        None => auto_detect_install(&repo_dir).await,
    };
    match install_cmd {
        Some(cmd) => {
            let opts = RunOptions {
                cwd: Some(&repo_dir),
                env: Some(&env),
                dry_run: dep.dry_run,
            };
            if let Err(e) = run_shell(&cmd, &opts, &log).await {
                return fail(engine, &mut dep, Some("install"), e, Some(&log)).await;
            }
            finish_step(engine, &mut dep, "install", StepStatus::Success).await?;
        }
        None => {
            log.line("no install command; skipping").await?;
            finish_step(engine, &mut dep, "install", StepStatus::Skipped).await?;
        }
    }

    // test
    begin(engine, &mut dep, "test").await?;
    match &resolved.test {
        Some(cmd) => {
            let opts = RunOptions {
                cwd: Some(&repo_dir),
                env: Some(&env),
                dry_run: dep.dry_run,
            };
            if let Err(e) = run_shell(cmd, &opts, &log).await {
                return fail(engine, &mut dep, Some("test"), e, Some(&log)).await;
            }
            finish_step(engine, &mut dep, "test", StepStatus::Success).await?;
        }
        None => {
            log.line("no test command; skipping").await?;
            finish_step(engine, &mut dep, "test", StepStatus::Skipped).await?;
        }
    }

    // build
    begin(engine, &mut dep, "build").await?;
    match &resolved.build {
        Some(cmd) => {
            let opts = RunOptions {
                cwd: Some(&repo_dir),
                env: Some(&env),
                dry_run: dep.dry_run,
            };
            if let Err(e) = run_shell(cmd, &opts, &log).await {
                return fail(engine, &mut dep, Some("build"), e, Some(&log)).await;
            }
        }
        None => {
            let e = DeployError::ConfigIncomplete("buildCommand is required".to_string());
            return fail(engine, &mut dep, Some("build"), e, Some(&log)).await;
        }
    }
    finish_step(engine, &mut dep, "build", StepStatus::Success).await?;

    // release
    begin(engine, &mut dep, "release").await?;
    let mut release_dir: Option<PathBuf> = None;
    if dep.dry_run {
        log.line(
            "[dry-run] would copy the build output into a new release and flip the current/previous symlinks",
        )
        .await?;
    } else {
        let output = project
            .build_output
            .clone()
            .unwrap_or_else(|| engine.options.default_build_output.clone());
        let commit = match dep.commit.clone() {
            Some(c) => c,
            None => {
                let e = DeployError::Internal("sync recorded no commit".to_string());
                return fail(engine, &mut dep, Some("release"), e, Some(&log)).await;
            }
        };

        let staged = match release::stage(&engine.layout, &project, &output, &commit, &log).await {
            Ok(p) => p,
            Err(e) => return fail(engine, &mut dep, Some("release"), e, Some(&log)).await,
        };

        let lock = engine.promote_lock(&project.id);
        {
            let _guard = lock.lock().await;
            if let Err(e) =
                release::promote(&engine.layout, engine.nginx_root(), &project, &staged, &log)
                    .await
            {
                return fail(engine, &mut dep, Some("release"), e, Some(&log)).await;
            }
        }
        release_dir = Some(staged);
    }
    finish_step(engine, &mut dep, "release", StepStatus::Success).await?;

    // PORT is forced between release and runtime; nginx needs it too.
    let mut runtime_port = project.runtime_port;
    if project.runtime == Runtime::Node {
        let port = match runtime_port {
            Some(p) => p,
            None => match engine.allocate_runtime_port().await {
                Ok(p) => p,
                Err(e) => return fail(engine, &mut dep, Some("nginx"), e, Some(&log)).await,
            },
        };
        if !dep.dry_run && project.runtime_port.is_none() {
            project.runtime_port = Some(port);
            if let Err(e) = engine.projects.save(&project).await {
                return fail(engine, &mut dep, Some("nginx"), e, Some(&log)).await;
            }
        }
        runtime_port = Some(port);
        env.insert("PORT".to_string(), port.to_string());
        log.line(&format!("runtime port {port}")).await?;
    }

    // nginx
    begin(engine, &mut dep, "nginx").await?;
    if let Err(e) = engine
        .nginx
        .install(&project, runtime_port, &log, dep.dry_run)
        .await
    {
        return fail(engine, &mut dep, Some("nginx"), e, Some(&log)).await;
    }
    finish_step(engine, &mut dep, "nginx", StepStatus::Success).await?;

    // runtime
    begin(engine, &mut dep, "runtime").await?;
    match project.runtime {
        Runtime::Node => {
            let start = match resolved.start.clone() {
                Some(s) => s,
                None => {
                    let e = DeployError::ConfigIncomplete(
                        "startCommand is required for the node runtime".to_string(),
                    );
                    return fail(engine, &mut dep, Some("runtime"), e, Some(&log)).await;
                }
            };
            let cwd = release_dir
                .clone()
                .unwrap_or_else(|| engine.layout.current_link(&project.id));
            if let Err(e) = engine
                .pm2
                .start(&project.id, &cwd, &start, &env, &log, dep.dry_run)
                .await
            {
                return fail(engine, &mut dep, Some("runtime"), e, Some(&log)).await;
            }
        }
        Runtime::Static => {
            log.line("static runtime; nothing to supervise").await?;
        }
    }
    finish_step(engine, &mut dep, "runtime", StepStatus::Success).await?;

    // finalize
    dep.status = DeploymentStatus::Success;
    dep.finished_at = Some(Utc::now());
    engine.deployments.save(&dep).await?;

    if !dep.dry_run {
        project.last_deploy = Some(Utc::now());
        project.last_commit = dep.commit.clone();
        engine.projects.save(&project).await?;
    }

    log.line("Deployment succeeded").await?;
    info!("Deployment {} for {} succeeded", dep.id, project.id);
    Ok(())
}

async fn begin(
    engine: &Arc<Engine>,
    dep: &mut Deployment,
    name: &str,
) -> Result<(), DeployError> {
    dep.begin_step(name);
    engine.deployments.save(dep).await
}

async fn finish_step(
    engine: &Arc<Engine>,
    dep: &mut Deployment,
    name: &str,
    status: StepStatus,
) -> Result<(), DeployError> {
    dep.end_step(name, status);
    engine.deployments.save(dep).await
}

/// Set the deployment terminal-failed, recording the step that broke when
/// one was reached. Steps after the failing one stay pending.
async fn fail(
    engine: &Arc<Engine>,
    dep: &mut Deployment,
    step: Option<&str>,
    err: DeployError,
    log: Option<&DeployLog>,
) -> Result<(), DeployError> {
    let message = err.to_string();
    if let Some(name) = step {
        dep.fail_step(name, message.clone());
    }
    dep.status = DeploymentStatus::Failed;
    dep.error = Some(message.clone());
    dep.finished_at = Some(Utc::now());
    engine.deployments.save(dep).await?;

    if let Some(log) = log {
        let _ = log.line(&format!("Deployment failed: {message}")).await;
        let _ = log.line(&format!("{err:?}")).await;
    }

    error!("Deployment {} failed: {}", dep.id, message);
    Ok(())
}

/// npm auto-detection when no install command is configured.
async fn auto_detect_install(repo_dir: &Path) -> Option<String> {
    if tokio::fs::try_exists(repo_dir.join("package-lock.json"))
        .await
        .unwrap_or(false)
    {
        return Some("npm ci".to_string());
    }
    if tokio::fs::try_exists(repo_dir.join("package.json"))
        .await
        .unwrap_or(false)
    {
        return Some("npm install --production".to_string());
    }
    None
}
