//! Application state wiring

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::engine::Engine;
use crate::deploy::nginx::NginxWriter;
use crate::deploy::pm2::Pm2;
use crate::errors::DeployError;
use crate::secrets::SecretsCodec;
use crate::server::state::ServerState;
use crate::storage::deployments::DeploymentStore;
use crate::storage::layout::Layout;
use crate::storage::projects::ProjectStore;
use crate::storage::templates::TemplateStore;
use crate::storage::users::UserStore;

/// Main application state
pub struct AppState {
    pub options: Arc<AppOptions>,
    pub layout: Arc<Layout>,
    pub codec: Arc<SecretsCodec>,
    pub projects: Arc<ProjectStore>,
    pub deployments: Arc<DeploymentStore>,
    pub templates: Arc<TemplateStore>,
    pub users: Arc<UserStore>,
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Initialize stores and the engine over the configured layout.
    pub async fn init(options: AppOptions) -> Result<Arc<Self>, DeployError> {
        info!("Initializing application state...");
        let options = Arc::new(options);

        let layout = Arc::new(Layout::new(
            options.storage.projects_dir.clone(),
            options.storage.logs_dir.clone(),
            options.storage.releases_dir_name.clone(),
        ));
        layout.setup().await?;

        let codec = Arc::new(SecretsCodec::new(options.secrets_master_key.as_deref()));
        let projects = Arc::new(ProjectStore::new(layout.clone(), codec.clone()));
        let deployments = Arc::new(DeploymentStore::new(layout.clone()));
        let templates = Arc::new(TemplateStore::new(layout.clone()));
        let users = Arc::new(UserStore::new(layout.clone(), options.admin_token.clone()));

        let engine = Engine::new(
            options.engine.clone(),
            layout.clone(),
            projects.clone(),
            deployments.clone(),
            templates.clone(),
            codec.clone(),
            NginxWriter::new(options.nginx.clone()),
            Pm2::new(options.pm2.clone()),
        );

        Ok(Arc::new(Self {
            options,
            layout,
            codec,
            projects,
            deployments,
            templates,
            users,
            engine,
        }))
    }

    /// State handed to the HTTP facade.
    pub fn server_state(&self) -> Arc<ServerState> {
        Arc::new(ServerState {
            options: self.options.clone(),
            layout: self.layout.clone(),
            engine: self.engine.clone(),
            projects: self.projects.clone(),
            deployments: self.deployments.clone(),
            users: self.users.clone(),
        })
    }
}
