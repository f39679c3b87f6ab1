//! Project records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Runtime kind of a project.
///
/// The release, nginx and runtime steps branch on this tag; adding a runtime
/// means extending the variant and those two switch sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Static,
    Node,
}

/// Publication target of a project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    #[default]
    Server,
    GithubPages,
    Both,
}

/// One environment entry.
///
/// A secret entry stores only `encrypted_value`; a plain entry stores only
/// `value`. A transient cleartext `value` on a secret entry is accepted on
/// input and encrypted before it reaches disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvEntry {
    pub key: String,

    #[serde(default)]
    pub is_secret: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_value: Option<String>,
}

/// A registered project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    /// Canonical HTTPS repository URL
    pub repo: String,

    pub branch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,

    /// Path of the build artifact directory, resolved against the repo root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_output: Option<String>,

    pub runtime: Runtime,

    /// Absolute path under the configured web root
    pub deploy_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub target: Target,

    pub owner_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: Vec<EnvEntry>,

    /// Port assigned on first deploy for `node` runtimes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deploy: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// The privileged owner whose project-level commands are honored without a
/// command template.
pub const ADMIN_OWNER_ID: &str = "admin";

impl Project {
    pub fn is_admin_owned(&self) -> bool {
        self.owner_id == ADMIN_OWNER_ID
    }

    /// Keys of all secret env entries; these must be redacted in logs.
    pub fn secret_keys(&self) -> Vec<String> {
        self.env
            .iter()
            .filter(|e| e.is_secret)
            .map(|e| e.key.clone())
            .collect()
    }
}

/// Accept both the entry-list form and the legacy `{KEY: value}` map form,
/// coercing scalar values to strings and dropping keyless entries.
fn deserialize_env<'de, D>(deserializer: D) -> Result<Vec<EnvEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawEntry {
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        is_secret: bool,
        #[serde(default)]
        value: Option<serde_json::Value>,
        #[serde(default)]
        encrypted_value: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EnvForm {
        Entries(Vec<RawEntry>),
        Legacy(serde_json::Map<String, serde_json::Value>),
    }

    fn coerce(value: serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    let entries = match EnvForm::deserialize(deserializer)? {
        EnvForm::Entries(raw) => raw
            .into_iter()
            .filter_map(|e| {
                let key = e.key.filter(|k| !k.is_empty())?;
                Some(EnvEntry {
                    key,
                    is_secret: e.is_secret,
                    value: e.value.and_then(coerce),
                    encrypted_value: e.encrypted_value,
                })
            })
            .collect(),
        EnvForm::Legacy(map) => map
            .into_iter()
            .filter(|(k, _)| !k.is_empty())
            .map(|(key, value)| EnvEntry {
                key,
                is_secret: false,
                value: coerce(value),
                encrypted_value: None,
            })
            .collect(),
    };

    Ok(entries)
}
