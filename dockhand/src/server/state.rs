//! Server state

use std::sync::Arc;

use crate::app::options::AppOptions;
use crate::deploy::engine::Engine;
use crate::storage::deployments::DeploymentStore;
use crate::storage::layout::Layout;
use crate::storage::projects::ProjectStore;
use crate::storage::users::UserStore;

/// Server state shared across handlers
pub struct ServerState {
    pub options: Arc<AppOptions>,
    pub layout: Arc<Layout>,
    pub engine: Arc<Engine>,
    pub projects: Arc<ProjectStore>,
    pub deployments: Arc<DeploymentStore>,
    pub users: Arc<UserStore>,
}
