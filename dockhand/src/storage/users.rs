//! Users file
//!
//! Opaque bearer tokens resolved to an owner identity. The file is written
//! with tempfile + rename and kept at mode 0600; an optional `ADMIN_TOKEN`
//! from the environment maps to the privileged `admin` identity without an
//! entry on disk.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::File;
use crate::models::project::ADMIN_OWNER_ID;
use crate::storage::layout::Layout;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,

    pub token: String,

    #[serde(default)]
    pub is_admin: bool,
}

pub struct UserStore {
    layout: Arc<Layout>,
    admin_token: Option<String>,
}

impl UserStore {
    pub fn new(layout: Arc<Layout>, admin_token: Option<String>) -> Self {
        Self {
            layout,
            admin_token: admin_token.filter(|t| !t.is_empty()),
        }
    }

    fn file(&self) -> File {
        File::new(self.layout.users_file())
    }

    pub async fn load_all(&self) -> Result<Vec<User>, DeployError> {
        let file = self.file();
        if !file.exists().await {
            return Ok(Vec::new());
        }
        file.read_json().await
    }

    pub async fn save_all(&self, users: &[User]) -> Result<(), DeployError> {
        let file = self.file();
        file.write_json(&users.to_vec()).await?;
        file.set_permissions_600().await
    }

    /// Resolve a bearer token to a user, or `None` for unknown tokens.
    pub async fn resolve(&self, token: &str) -> Result<Option<User>, DeployError> {
        if token.is_empty() {
            return Ok(None);
        }

        if self.admin_token.as_deref() == Some(token) {
            return Ok(Some(User {
                id: ADMIN_OWNER_ID.to_string(),
                token: token.to_string(),
                is_admin: true,
            }));
        }

        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|u| u.token == token))
    }
}
