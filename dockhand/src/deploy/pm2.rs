//! Process manager adapter
//!
//! Long-running `node` runtimes are supervised by an external PM2 binary.
//! The start command runs under `bash -lc` inside the current release
//! directory with the merged project env (including `PORT`).

use std::collections::HashMap;
use std::path::Path;

use crate::deploy::runner::{run, DeployLog, RunOptions};
use crate::errors::DeployError;

/// Process manager configuration
#[derive(Debug, Clone)]
pub struct Options {
    pub bin: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bin: "pm2".to_string(),
        }
    }
}

pub struct Pm2 {
    options: Options,
}

impl Pm2 {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Start (or replace) the supervised process for a deploy.
    pub async fn start(
        &self,
        project_id: &str,
        release_dir: &Path,
        start_command: &str,
        env: &HashMap<String, String>,
        log: &DeployLog,
        dry_run: bool,
    ) -> Result<(), DeployError> {
        let cwd = release_dir.to_string_lossy().to_string();
        let opts = RunOptions {
            env: Some(env),
            dry_run,
            ..Default::default()
        };
        run(
            &self.options.bin,
            &[
                "start",
                "bash",
                "--name",
                project_id,
                "--cwd",
                &cwd,
                "--update-env",
                "--",
                "-lc",
                start_command,
            ],
            &opts,
            log,
        )
        .await?;
        Ok(())
    }

    /// Restart the supervised process after a rollback.
    pub async fn restart(
        &self,
        project_id: &str,
        env: &HashMap<String, String>,
        log: &DeployLog,
        dry_run: bool,
    ) -> Result<(), DeployError> {
        let opts = RunOptions {
            env: Some(env),
            dry_run,
            ..Default::default()
        };
        run(&self.options.bin, &["restart", project_id], &opts, log).await?;
        Ok(())
    }
}
