//! Child-process environment construction
//!
//! Merges plain vars and decrypted secrets into the environment handed to
//! build/runtime subprocesses, and enumerates the keys whose values must be
//! redacted from log output.

use std::collections::HashMap;

use crate::errors::DeployError;
use crate::models::project::EnvEntry;
use crate::secrets::codec::SecretsCodec;

/// Result of building a child-process environment
#[derive(Debug, Default, Clone)]
pub struct BuiltEnv {
    pub plain: HashMap<String, String>,
    pub secret: HashMap<String, String>,
    /// Keys to redact in subprocess output
    pub secret_keys: Vec<String>,
}

impl BuiltEnv {
    /// Plain and secret vars merged into one map.
    pub fn merged(&self) -> HashMap<String, String> {
        let mut env = self.plain.clone();
        env.extend(self.secret.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

/// Build the environment for a project's env entries.
///
/// Entries without a key are ignored. A secret entry must carry either an
/// `encrypted_value` (decrypted here) or a transient cleartext `value`; any
/// decryption failure fails the whole build.
pub fn build_env(entries: &[EnvEntry], codec: &SecretsCodec) -> Result<BuiltEnv, DeployError> {
    let mut built = BuiltEnv::default();

    for entry in entries {
        if entry.key.is_empty() {
            continue;
        }

        if entry.is_secret {
            built.secret_keys.push(entry.key.clone());

            let value = match (&entry.encrypted_value, &entry.value) {
                (Some(blob), _) => codec.decrypt(blob)?,
                (None, Some(transient)) => transient.clone(),
                (None, None) => {
                    return Err(DeployError::SecretMissingValue(entry.key.clone()));
                }
            };
            built.secret.insert(entry.key.clone(), value);
        } else if let Some(value) = &entry.value {
            built.plain.insert(entry.key.clone(), value.clone());
        }
    }

    Ok(built)
}
