//! VCS client
//!
//! Clone-or-refresh of the project working tree, driven through the process
//! runner so all git output lands in the deployment log.

use std::collections::HashMap;
use std::path::Path;

use crate::deploy::runner::{run, DeployLog, RunOptions};
use crate::errors::DeployError;

/// Env for every git invocation. Prompting for credentials would hang a
/// worker forever; a missing credential must fail the step instead.
fn git_env() -> HashMap<String, String> {
    HashMap::from([("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())])
}

/// Normalize an http(s) repository URL to end in `.git`.
pub fn normalize_repo_url(repo: &str) -> String {
    let is_http = repo.starts_with("https://") || repo.starts_with("http://");
    if is_http && !repo.ends_with(".git") {
        format!("{}.git", repo.trim_end_matches('/'))
    } else {
        repo.to_string()
    }
}

/// Clone the branch if the working tree is absent, otherwise fetch and
/// fast-forward it.
pub async fn sync_repository(
    repo_url: &str,
    branch: &str,
    repo_dir: &Path,
    log: &DeployLog,
    dry_run: bool,
) -> Result<(), DeployError> {
    let url = normalize_repo_url(repo_url);
    let dir = repo_dir.to_string_lossy().to_string();

    let env = git_env();
    let has_repo = tokio::fs::metadata(repo_dir.join(".git")).await.is_ok();
    if has_repo {
        let opts = RunOptions {
            cwd: Some(repo_dir),
            env: Some(&env),
            dry_run,
        };
        run("git", &["fetch", "--all", "--prune"], &opts, log).await?;
        run("git", &["checkout", branch], &opts, log).await?;
        run("git", &["pull", "--ff-only"], &opts, log).await?;
    } else {
        let opts = RunOptions {
            cwd: None,
            env: Some(&env),
            dry_run,
        };
        run(
            "git",
            &["clone", "--branch", branch, &url, &dir],
            &opts,
            log,
        )
        .await?;
    }

    Ok(())
}

/// One-time shallow clone performed at project import.
pub async fn clone_shallow(
    repo_url: &str,
    branch: &str,
    repo_dir: &Path,
    log: &DeployLog,
) -> Result<(), DeployError> {
    let url = normalize_repo_url(repo_url);
    let dir = repo_dir.to_string_lossy().to_string();
    let env = git_env();
    let opts = RunOptions {
        cwd: None,
        env: Some(&env),
        dry_run: false,
    };
    run(
        "git",
        &["clone", "--depth", "1", "--branch", branch, &url, &dir],
        &opts,
        log,
    )
    .await?;
    Ok(())
}

/// Resolve the HEAD commit of the working tree.
pub async fn head_commit(repo_dir: &Path, log: &DeployLog) -> Result<String, DeployError> {
    let opts = RunOptions {
        cwd: Some(repo_dir),
        ..Default::default()
    };
    let out = run("git", &["rev-parse", "HEAD"], &opts, log).await?;
    Ok(out.stdout.trim().to_string())
}
