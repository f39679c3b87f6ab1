//! Command-template catalog
//!
//! A read-only JSON file mapping template id to its command preset. The file
//! is owned by the operator; dockhand never writes it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::DeployError;
use crate::filesys::File;
use crate::models::template::CommandTemplate;
use crate::storage::layout::Layout;

pub struct TemplateStore {
    layout: Arc<Layout>,
}

impl TemplateStore {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self { layout }
    }

    pub async fn load_all(&self) -> Result<HashMap<String, CommandTemplate>, DeployError> {
        let file = File::new(self.layout.templates_file());
        if !file.exists().await {
            return Ok(HashMap::new());
        }
        file.read_json().await
    }

    pub async fn get(&self, template_id: &str) -> Result<CommandTemplate, DeployError> {
        self.load_all()
            .await?
            .remove(template_id)
            .ok_or_else(|| DeployError::NotFound(format!("template {template_id}")))
    }
}
