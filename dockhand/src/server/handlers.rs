//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::deploy::git;
use crate::deploy::runner::DeployLog;
use crate::errors::DeployError;
use crate::models::project::{EnvEntry, Project, Runtime, Target};
use crate::server::auth::Caller;
use crate::server::response::ApiError;
use crate::server::state::ServerState;
use crate::validate;

const DEFAULT_DEPLOYMENT_LIMIT: usize = 20;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub config: HealthConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub projects_dir: String,
    pub logs_dir: String,
    pub build_dir: String,
    pub nginx_root: String,
    pub max_concurrent_deploys: usize,
    pub max_queue_size: usize,
    pub version: String,
}

/// Health check handler (unauthenticated)
pub async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let options = &state.options;
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        config: HealthConfig {
            projects_dir: options.storage.projects_dir.display().to_string(),
            logs_dir: options.storage.logs_dir.display().to_string(),
            build_dir: options.storage.build_dir.display().to_string(),
            nginx_root: options.nginx.root.display().to_string(),
            max_concurrent_deploys: options.engine.max_concurrent_deploys,
            max_queue_size: options.engine.max_queue_size,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}

/// Import request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub repo_url: String,
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
    #[serde(default)]
    pub env: Vec<EnvEntry>,
}

/// Register a project and perform the one-time shallow clone.
pub async fn import_project(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Json(req): Json<ImportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = validate::validate_repo_url(&req.repo_url)?;
    let project_id = validate::slug_from_repo_url(&url)?;

    let branch = req.branch.unwrap_or_else(|| "main".to_string());
    validate::validate_branch(&branch)?;

    if !caller.is_admin && req.template_id.is_none() {
        return Err(ApiError::bad_request(
            "projects not owned by admin must reference a command template",
        ));
    }

    let deploy_path = match req.deploy_path {
        Some(path) => validate::validate_deploy_path(&state.options.nginx.root, &path)?,
        None => state.options.nginx.root.join(&project_id),
    };

    if let Some(output) = &req.build_output {
        validate::validate_build_output(&state.layout.repo_dir(&project_id), output)?;
    }
    validate::validate_env_entries(&req.env)?;

    let now = Utc::now();
    let project = Project {
        id: project_id.clone(),
        repo: url.to_string(),
        branch: branch.clone(),
        install_command: req.install_command,
        build_command: req.build_command,
        test_command: req.test_command,
        start_command: req.start_command,
        build_output: req.build_output,
        runtime: req.runtime.unwrap_or(Runtime::Static),
        deploy_path: deploy_path.display().to_string(),
        domain: req.domain,
        port: req.port,
        target: req.target.unwrap_or_default(),
        owner_id: caller.id,
        template_id: req.template_id,
        env: req.env,
        runtime_port: None,
        last_deploy: None,
        last_commit: None,
        created_at: now,
        updated_at: now,
    };

    let project = state.projects.create(project).await?;

    // Best-effort warm clone; the sync step clones on first deploy if this
    // one did not stick.
    let log = DeployLog::create(
        &state.layout.log_file(&project.id, "import"),
        Vec::new(),
    )
    .await?;
    if let Err(e) = git::clone_shallow(
        &project.repo,
        &project.branch,
        &state.layout.repo_dir(&project.id),
        &log,
    )
    .await
    {
        warn!("Initial clone for {} failed: {}", project.id, e);
        let _ = log
            .line(&format!("initial clone failed, will retry on deploy: {e}"))
            .await;
    }

    Ok((StatusCode::CREATED, Json(project)))
}

/// Partial project update. Refused while a deployment is queued or running.
pub async fn update_project(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(project_id): Path<String>,
    Json(update): Json<crate::storage::projects::ProjectUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.projects.get(&project_id).await?;
    if !caller.owns(&project) {
        return Err(ApiError::not_found(format!("project {project_id}")));
    }

    if state.deployments.has_active(&project_id).await? {
        return Err(ApiError::conflict(
            "project has a deployment in progress",
        ));
    }

    if let Some(repo) = &update.repo {
        validate::validate_repo_url(repo)?;
    }
    if let Some(branch) = &update.branch {
        validate::validate_branch(branch)?;
    }
    if let Some(path) = &update.deploy_path {
        validate::validate_deploy_path(&state.options.nginx.root, path)?;
    }
    if let Some(output) = &update.build_output {
        validate::validate_build_output(&state.layout.repo_dir(&project_id), output)?;
    }

    let updated = state.projects.apply_update(&project_id, update).await?;
    Ok(Json(updated))
}

/// Deploy request body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployRequest {
    pub dry_run: bool,
}

/// Enqueue a deployment. Returns as soon as the queued record is persisted.
pub async fn deploy_project(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(project_id): Path<String>,
    body: Option<Json<DeployRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.projects.get(&project_id).await?;
    if !caller.owns(&project) {
        return Err(ApiError::not_found(format!("project {project_id}")));
    }

    let dry_run = body.map(|Json(b)| b.dry_run).unwrap_or(false);
    let deployment = state.engine.enqueue(&project_id, dry_run).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "deploymentId": deployment.id,
            "status": "queued",
            "projectId": project_id,
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Deployments of a project, newest first.
pub async fn list_deployments(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.projects.get(&project_id).await?;
    if !caller.owns(&project) {
        return Err(ApiError::not_found(format!("project {project_id}")));
    }

    let limit = query.limit.unwrap_or(DEFAULT_DEPLOYMENT_LIMIT).max(1);
    let deployments = state.deployments.list_for_project(&project_id, limit).await?;
    Ok(Json(deployments))
}

/// One deployment record.
pub async fn get_deployment(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state.deployments.get(&deployment_id).await?;
    let project = state.projects.get(&deployment.project_id).await?;
    if !caller.owns(&project) {
        return Err(ApiError::not_found(format!("deployment {deployment_id}")));
    }
    Ok(Json(deployment))
}

/// Deployment log as plain text; empty body if the file is missing.
pub async fn get_deployment_log(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state.deployments.get(&deployment_id).await?;
    let project = state.projects.get(&deployment.project_id).await?;
    if !caller.owns(&project) {
        return Err(ApiError::not_found(format!("deployment {deployment_id}")));
    }

    let body = match tokio::fs::read_to_string(&deployment.log_path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ApiError::from(DeployError::from(e))),
    };

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    ))
}

/// One-step rollback to the previous release.
pub async fn rollback_project(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.projects.get(&project_id).await?;
    if !caller.owns(&project) {
        return Err(ApiError::not_found(format!("project {project_id}")));
    }

    state.engine.rollback(&project_id).await?;
    Ok(Json(json!({ "status": "ok" })))
}
