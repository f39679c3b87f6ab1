//! Pipeline engine end-to-end tests
//!
//! These drive the engine directly against temp directories: a dry run to
//! completion, a tampered-secret failure, and the admission bound under a
//! slow build.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;

use dockhand::deploy::engine::{Engine, Options as EngineOptions};
use dockhand::deploy::nginx::{NginxWriter, Options as NginxOptions};
use dockhand::deploy::pm2::{Options as Pm2Options, Pm2};
use dockhand::errors::DeployError;
use dockhand::models::deployment::{Deployment, DeploymentStatus, StepStatus};
use dockhand::models::project::{EnvEntry, Project, Runtime, Target};
use dockhand::secrets::SecretsCodec;
use dockhand::storage::deployments::DeploymentStore;
use dockhand::storage::layout::Layout;
use dockhand::storage::projects::ProjectStore;
use dockhand::storage::templates::TemplateStore;

struct Harness {
    tmp: tempfile::TempDir,
    layout: Arc<Layout>,
    codec: Arc<SecretsCodec>,
    projects: Arc<ProjectStore>,
    deployments: Arc<DeploymentStore>,
    engine: Arc<Engine>,
}

async fn harness(options: EngineOptions) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let layout = Arc::new(Layout::new(
        tmp.path().join("projects"),
        tmp.path().join("logs"),
        "releases",
    ));
    layout.setup().await.unwrap();

    let codec = Arc::new(SecretsCodec::new(Some("pipeline-test-master-key")));
    let projects = Arc::new(ProjectStore::new(layout.clone(), codec.clone()));
    let deployments = Arc::new(DeploymentStore::new(layout.clone()));
    let templates = Arc::new(TemplateStore::new(layout.clone()));

    let nginx_options = NginxOptions {
        root: tmp.path().join("www"),
        sites_available: tmp.path().join("sites-available"),
        sites_enabled: tmp.path().join("sites-enabled"),
    };
    tokio::fs::create_dir_all(&nginx_options.root).await.unwrap();

    let engine = Engine::new(
        options,
        layout.clone(),
        projects.clone(),
        deployments.clone(),
        templates,
        codec.clone(),
        NginxWriter::new(nginx_options),
        Pm2::new(Pm2Options::default()),
    );

    Harness {
        tmp,
        layout,
        codec,
        projects,
        deployments,
        engine,
    }
}

fn base_project(harness: &Harness, id: &str) -> Project {
    Project {
        id: id.into(),
        repo: "https://github.com/acme/site".into(),
        branch: "main".into(),
        install_command: None,
        build_command: Some("npm run build".into()),
        test_command: None,
        start_command: None,
        build_output: Some("build".into()),
        runtime: Runtime::Static,
        deploy_path: harness
            .tmp
            .path()
            .join("www")
            .join(id)
            .to_string_lossy()
            .into_owned(),
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

async fn wait_terminal(store: &DeploymentStore, deployment_id: &str) -> Deployment {
    for _ in 0..400 {
        let dep = store.get(deployment_id).await.unwrap();
        if dep.status.is_terminal() {
            return dep;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("deployment {deployment_id} did not reach a terminal state");
}

async fn release_count(layout: &Layout, project_id: &str) -> usize {
    let mut count = 0;
    let mut entries = match tokio::fs::read_dir(layout.releases_dir(project_id)).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    while let Some(_entry) = entries.next_entry().await.unwrap() {
        count += 1;
    }
    count
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dry_run_completes_without_filesystem_mutations() {
    let h = harness(EngineOptions::default()).await;
    h.projects.create(base_project(&h, "site")).await.unwrap();

    let queued = h.engine.enqueue("site", true).await.unwrap();
    assert_eq!(queued.status, DeploymentStatus::Queued);

    let done = wait_terminal(&h.deployments, &queued.id).await;
    assert_eq!(done.status, DeploymentStatus::Success);
    assert!(done.dry_run);
    assert!(done.commit.is_none());

    assert_eq!(done.steps["sync"].status, StepStatus::Success);
    assert_eq!(done.steps["install"].status, StepStatus::Skipped);
    assert_eq!(done.steps["test"].status, StepStatus::Skipped);
    assert_eq!(done.steps["build"].status, StepStatus::Success);
    assert_eq!(done.steps["release"].status, StepStatus::Success);
    assert_eq!(done.steps["nginx"].status, StepStatus::Success);
    assert_eq!(done.steps["runtime"].status, StepStatus::Success);

    // Every would-be command was logged, redacted form, nothing executed.
    let log = tokio::fs::read_to_string(&done.log_path).await.unwrap();
    assert!(log.contains("git clone"));
    assert!(log.contains("npm run build"));
    assert!(log.contains("nginx -t"));

    // No release was created, no symlinks flipped, project untouched.
    assert_eq!(release_count(&h.layout, "site").await, 0);
    assert!(tokio::fs::symlink_metadata(h.layout.current_link("site"))
        .await
        .is_err());
    let project = h.projects.get("site").await.unwrap();
    assert!(project.last_deploy.is_none());
    assert!(project.last_commit.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tampered_secret_fails_before_any_subprocess() {
    let h = harness(EngineOptions::default()).await;

    let blob = h.codec.encrypt("topsecret").unwrap();
    let mut raw = BASE64.decode(&blob).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    let tampered = BASE64.encode(raw);

    let mut project = base_project(&h, "site");
    project.env = vec![EnvEntry {
        key: "API_KEY".into(),
        is_secret: true,
        value: None,
        encrypted_value: Some(tampered),
    }];
    h.projects.create(project).await.unwrap();

    let queued = h.engine.enqueue("site", false).await.unwrap();
    let done = wait_terminal(&h.deployments, &queued.id).await;

    assert_eq!(done.status, DeploymentStatus::Failed);
    assert!(done
        .error
        .as_deref()
        .unwrap()
        .contains("Failed to decrypt secrets"));

    // The failure happened before the sync step spawned anything.
    assert_eq!(done.steps["sync"].status, StepStatus::Pending);
    assert_eq!(release_count(&h.layout, "site").await, 0);

    let log = tokio::fs::read_to_string(&done.log_path).await.unwrap();
    assert!(log.contains("Failed to decrypt secrets"));
}

fn git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed");
}

fn make_origin(dir: &Path) -> PathBuf {
    let origin = dir.join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init"]);
    git(&origin, &["checkout", "-B", "main"]);
    std::fs::write(origin.join("README.md"), "# fixture\n").unwrap();
    git(&origin, &["add", "."]);
    git(
        &origin,
        &[
            "-c",
            "user.email=ci@example.com",
            "-c",
            "user.name=ci",
            "commit",
            "-m",
            "init",
        ],
    );
    origin
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admission_is_bounded_including_active_jobs() {
    let h = harness(EngineOptions {
        max_concurrent_deploys: 1,
        max_queue_size: 2,
        default_build_output: "build".into(),
    })
    .await;

    let origin = make_origin(h.tmp.path());
    let mut project = base_project(&h, "site");
    project.repo = origin.to_string_lossy().into_owned();
    // Keep the single worker busy long enough for the third enqueue.
    project.build_command = Some("sleep 5".into());
    project.build_output = Some(".".into());
    h.projects.create(project).await.unwrap();

    h.engine.enqueue("site", false).await.unwrap();
    h.engine.enqueue("site", false).await.unwrap();

    let err = h.engine.enqueue("site", false).await.unwrap_err();
    assert!(matches!(err, DeployError::QueueFull));

    // The rejected deployment left no record behind.
    let records = h.deployments.list_for_project("site", 10).await.unwrap();
    assert_eq!(records.len(), 2);
}
