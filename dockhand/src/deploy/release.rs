//! Release publication
//!
//! A release is an immutable copy of the build output under
//! `releases/<epochMs>-<sha7>`. Promotion re-points `previous`, `current` and
//! the deploy path with unlink-then-symlink replacements; the caller holds the
//! per-project promotion lock across `promote` and `rollback_pointers`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::deploy::runner::DeployLog;
use crate::errors::DeployError;
use crate::filesys::{dir, link};
use crate::models::project::Project;
use crate::storage::layout::Layout;
use crate::validate;

/// Directory name for a new release.
pub fn release_name(commit: &str) -> String {
    let sha7: String = commit.chars().take(7).collect();
    format!("{}-{}", Utc::now().timestamp_millis(), sha7)
}

/// Resolve the build output directory against the repo root, rejecting paths
/// that escape it and outputs that do not exist.
pub async fn resolve_build_output(
    repo_dir: &Path,
    build_output: &str,
) -> Result<PathBuf, DeployError> {
    let repo_root = tokio::fs::canonicalize(repo_dir).await.map_err(|_| {
        DeployError::Validation(format!(
            "repository working tree {} does not exist",
            repo_dir.display()
        ))
    })?;

    let candidate = Path::new(build_output);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        repo_root.join(candidate)
    };

    let resolved = tokio::fs::canonicalize(&joined).await.map_err(|_| {
        DeployError::Validation(format!(
            "build output {} does not exist",
            joined.display()
        ))
    })?;

    if !(resolved == repo_root || resolved.starts_with(&repo_root)) {
        return Err(DeployError::PathEscape(format!(
            "build output {} escapes the repository root",
            build_output
        )));
    }
    if !resolved.is_dir() {
        return Err(DeployError::Validation(format!(
            "build output {} is not a directory",
            resolved.display()
        )));
    }

    Ok(resolved)
}

/// Copy the build output into a fresh release directory.
pub async fn stage(
    layout: &Layout,
    project: &Project,
    build_output: &str,
    commit: &str,
    log: &DeployLog,
) -> Result<PathBuf, DeployError> {
    let output = resolve_build_output(&layout.repo_dir(&project.id), build_output).await?;

    let release_dir = layout.release_dir(&project.id, &release_name(commit));
    dir::copy_recursive(&output, &release_dir).await?;
    log.line(&format!(
        "staged {} -> {}",
        output.display(),
        release_dir.display()
    ))
    .await?;

    Ok(release_dir)
}

/// Flip `previous`, `current` and the deploy path to the new release.
///
/// The deploy path is re-verified against the web root here, even though the
/// validator checked it at payload time.
pub async fn promote(
    layout: &Layout,
    nginx_root: &Path,
    project: &Project,
    release_dir: &Path,
    log: &DeployLog,
) -> Result<(), DeployError> {
    let current = layout.current_link(&project.id);
    let previous = layout.previous_link(&project.id);

    if let Some(old) = link::target(&current).await? {
        link::replace(&previous, &old).await?;
    }
    link::replace(&current, release_dir).await?;

    let deploy_path = validate::validate_deploy_path(nginx_root, &project.deploy_path)?;
    link::replace(&deploy_path, release_dir).await?;

    log.line(&format!(
        "promoted {} (deploy path {})",
        release_dir.display(),
        deploy_path.display()
    ))
    .await?;

    Ok(())
}

/// Roll the live pointers back to the previous release.
///
/// Returns the release the pointers now name. No deployment record is
/// created; rollback is a direct mutation of the live pointer.
pub async fn rollback_pointers(
    layout: &Layout,
    nginx_root: &Path,
    project: &Project,
    log: &DeployLog,
) -> Result<PathBuf, DeployError> {
    let previous = layout.previous_link(&project.id);
    let target = link::target(&previous)
        .await?
        .ok_or(DeployError::NoPrevious)?;

    link::replace(&layout.current_link(&project.id), &target).await?;

    let deploy_path = validate::validate_deploy_path(nginx_root, &project.deploy_path)?;
    link::replace(&deploy_path, &target).await?;

    log.line(&format!("rolled back to {}", target.display()))
        .await?;

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{Runtime, Target};

    struct Fixture {
        _tmp: tempfile::TempDir,
        layout: Layout,
        nginx_root: PathBuf,
        project: Project,
        log: DeployLog,
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(
            tmp.path().join("projects"),
            tmp.path().join("logs"),
            "releases",
        );
        let nginx_root = tmp.path().join("www");
        tokio::fs::create_dir_all(&nginx_root).await.unwrap();

        let project = Project {
            id: "site".into(),
            repo: "https://github.com/acme/site.git".into(),
            branch: "main".into(),
            install_command: None,
            build_command: Some("npm run build".into()),
            test_command: None,
            start_command: None,
            build_output: Some("build".into()),
            runtime: Runtime::Static,
            deploy_path: nginx_root.join("site").to_string_lossy().into_owned(),
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
        };

        layout.setup_project("site").await.unwrap();
        let log = DeployLog::create(&layout.log_file("site", "test"), Vec::new())
            .await
            .unwrap();

        Fixture {
            _tmp: tmp,
            layout,
            nginx_root,
            project,
            log,
        }
    }

    async fn write_build_output(layout: &Layout, marker: &str) {
        let build = layout.repo_dir("site").join("build");
        tokio::fs::create_dir_all(&build).await.unwrap();
        tokio::fs::write(build.join("index.html"), marker)
            .await
            .unwrap();
    }

    async fn publish(fx: &Fixture, commit: &str) -> PathBuf {
        let release = stage(&fx.layout, &fx.project, "build", commit, &fx.log)
            .await
            .unwrap();
        promote(&fx.layout, &fx.nginx_root, &fx.project, &release, &fx.log)
            .await
            .unwrap();
        release
    }

    #[tokio::test]
    async fn test_first_publish_sets_current_and_deploy_path() {
        let fx = fixture().await;
        write_build_output(&fx.layout, "v1").await;

        let r1 = publish(&fx, &"a".repeat(40)).await;

        let current = link::target(&fx.layout.current_link("site"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current, r1);
        assert!(current.starts_with(fx.layout.releases_dir("site")));

        // No previous release yet.
        assert!(link::target(&fx.layout.previous_link("site"))
            .await
            .unwrap()
            .is_none());

        let served =
            tokio::fs::read_to_string(Path::new(&fx.project.deploy_path).join("index.html"))
                .await
                .unwrap();
        assert_eq!(served, "v1");
    }

    #[tokio::test]
    async fn test_second_publish_rotates_previous() {
        let fx = fixture().await;
        write_build_output(&fx.layout, "v1").await;
        let r1 = publish(&fx, &"a".repeat(40)).await;

        write_build_output(&fx.layout, "v2").await;
        let r2 = publish(&fx, &"b".repeat(40)).await;

        let current = link::target(&fx.layout.current_link("site"))
            .await
            .unwrap()
            .unwrap();
        let previous = link::target(&fx.layout.previous_link("site"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current, r2);
        assert_eq!(previous, r1);

        let served =
            tokio::fs::read_to_string(Path::new(&fx.project.deploy_path).join("index.html"))
                .await
                .unwrap();
        assert_eq!(served, "v2");
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_release() {
        let fx = fixture().await;
        write_build_output(&fx.layout, "v1").await;
        let r1 = publish(&fx, &"a".repeat(40)).await;
        write_build_output(&fx.layout, "v2").await;
        publish(&fx, &"b".repeat(40)).await;

        let restored = rollback_pointers(&fx.layout, &fx.nginx_root, &fx.project, &fx.log)
            .await
            .unwrap();
        assert_eq!(restored, r1);

        let current = link::target(&fx.layout.current_link("site"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current, r1);

        let served =
            tokio::fs::read_to_string(Path::new(&fx.project.deploy_path).join("index.html"))
                .await
                .unwrap();
        assert_eq!(served, "v1");
    }

    #[tokio::test]
    async fn test_rollback_without_previous_fails() {
        let fx = fixture().await;
        write_build_output(&fx.layout, "v1").await;
        publish(&fx, &"a".repeat(40)).await;

        assert!(matches!(
            rollback_pointers(&fx.layout, &fx.nginx_root, &fx.project, &fx.log).await,
            Err(DeployError::NoPrevious)
        ));
    }

    #[tokio::test]
    async fn test_escaping_build_output_is_rejected() {
        let fx = fixture().await;
        write_build_output(&fx.layout, "v1").await;

        assert!(matches!(
            stage(&fx.layout, &fx.project, "../../../etc", &"a".repeat(40), &fx.log).await,
            Err(DeployError::PathEscape(_)) | Err(DeployError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_build_output_is_rejected() {
        let fx = fixture().await;
        // Repo exists but has no build directory.
        tokio::fs::create_dir_all(fx.layout.repo_dir("site"))
            .await
            .unwrap();

        assert!(matches!(
            stage(&fx.layout, &fx.project, "build", &"a".repeat(40), &fx.log).await,
            Err(DeployError::Validation(_))
        ));
    }
}
