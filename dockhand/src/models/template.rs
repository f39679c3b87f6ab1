//! Command templates
//!
//! A template is a named preset of install/build/test/start commands.
//! Projects not owned by the privileged admin must reference one; their own
//! command fields are ignored, which keeps arbitrary command injection out of
//! reach of regular owners.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
}
