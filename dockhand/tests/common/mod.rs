//! In-process test server harness
//!
//! Boots the daemon on an ephemeral port against temp directories and hands
//! back tokens for the privileged admin and a regular user.

use std::sync::Arc;

use tempfile::TempDir;

use dockhand::app::options::AppOptions;
use dockhand::app::state::AppState;
use dockhand::server::serve::serve;
use dockhand::storage::users::User;

pub const ADMIN_TOKEN: &str = "admin-test-token";
pub const USER_TOKEN: &str = "alice-test-token";

#[allow(dead_code)]
pub struct TestApp {
    pub state: Arc<AppState>,
    pub base_url: String,
    pub temp_dir: TempDir,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl TestApp {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut AppOptions)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");

        let mut options = AppOptions::default();
        options.server.host = "127.0.0.1".to_string();
        options.server.port = 0;
        options.storage.projects_dir = temp_dir.path().join("projects");
        options.storage.logs_dir = temp_dir.path().join("logs");
        options.storage.build_dir = temp_dir.path().join("build");
        options.nginx.root = temp_dir.path().join("www");
        options.nginx.sites_available = temp_dir.path().join("sites-available");
        options.nginx.sites_enabled = temp_dir.path().join("sites-enabled");
        options.secrets_master_key = Some("api-test-master-key".to_string());
        options.admin_token = Some(ADMIN_TOKEN.to_string());
        tweak(&mut options);

        tokio::fs::create_dir_all(&options.nginx.root)
            .await
            .expect("create web root");

        let state = AppState::init(options).await.expect("init app state");
        state
            .users
            .save_all(&[User {
                id: "alice".to_string(),
                token: USER_TOKEN.to_string(),
                is_admin: false,
            }])
            .await
            .expect("write users file");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let (_handle, addr) = serve(&state.options.server, state.server_state(), async move {
            let _ = shutdown_rx.await;
        })
        .await
        .expect("start server");

        Self {
            state,
            base_url: format!("http://{addr}"),
            temp_dir,
            _shutdown: shutdown_tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
