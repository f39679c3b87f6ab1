//! Process runner
//!
//! Spawns subprocesses in argv form (no shell) or through `bash -lc`, streams
//! stdout/stderr line-wise into the deployment log with secret redaction
//! applied before every write, and returns the captured output. In dry-run
//! mode the redacted command line is logged and nothing is spawned.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::errors::DeployError;

/// Substitute `KEY=<token>` with `KEY=[redacted]` for every configured key.
///
/// Best-effort keyword-context defense: values that appear bare in program
/// output carry no keyword and cannot be matched.
pub fn redact(input: &str, keys: &[String]) -> String {
    let mut out = input.to_string();

    for key in keys {
        if key.is_empty() {
            continue;
        }
        let needle = format!("{key}=");
        let mut redacted = String::with_capacity(out.len());
        let mut rest = out.as_str();

        while let Some(pos) = rest.find(&needle) {
            let at_boundary = rest[..pos]
                .chars()
                .next_back()
                .map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_'));
            let value_start = pos + needle.len();
            redacted.push_str(&rest[..value_start]);
            rest = &rest[value_start..];

            if at_boundary {
                redacted.push_str("[redacted]");
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                rest = &rest[end..];
            }
        }

        redacted.push_str(rest);
        out = redacted;
    }

    out
}

/// Append-only deployment log with redaction applied before every write
pub struct DeployLog {
    file: Mutex<tokio::fs::File>,
    redact_keys: Vec<String>,
}

impl DeployLog {
    /// Open (or create) the log file in append mode.
    pub async fn create(path: &Path, redact_keys: Vec<String>) -> Result<Self, DeployError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            file: Mutex::new(file),
            redact_keys,
        })
    }

    pub fn redact_keys(&self) -> &[String] {
        &self.redact_keys
    }

    /// Write one line, redacted.
    pub async fn line(&self, line: &str) -> Result<(), DeployError> {
        let safe = redact(line, &self.redact_keys);
        let mut file = self.file.lock().await;
        file.write_all(safe.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Options for one subprocess invocation
#[derive(Default)]
pub struct RunOptions<'a> {
    pub cwd: Option<&'a Path>,
    pub env: Option<&'a HashMap<String, String>>,
    pub dry_run: bool,
}

/// Captured output of a finished subprocess
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Direct exec, no shell and no argument interpolation.
pub async fn run(
    program: &str,
    args: &[&str],
    opts: &RunOptions<'_>,
    log: &DeployLog,
) -> Result<CommandOutput, DeployError> {
    let safe_cmd = redact(
        &format!("{program} {}", args.join(" ")),
        log.redact_keys(),
    );

    if opts.dry_run {
        log.line(&format!("[dry-run] $ {safe_cmd}")).await?;
        return Ok(CommandOutput::default());
    }

    log.line(&format!("$ {safe_cmd}")).await?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = opts.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(env) = opts.env {
        cmd.envs(env);
    }

    let mut child = cmd.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DeployError::Internal("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DeployError::Internal("child stderr not captured".to_string()))?;

    let (stdout, stderr) = tokio::join!(pump(stdout, log), pump(stderr, log));
    let stdout = stdout?;
    let stderr = stderr?;

    let status = child.wait().await?;
    if !status.success() {
        let code = status.code().unwrap_or(-1);
        log.line(&format!("command exited with code {code}")).await?;
        return Err(DeployError::CommandFailed {
            code,
            safe_cmd,
            stdout,
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

/// Shell form: `bash -lc <script>`.
pub async fn run_shell(
    script: &str,
    opts: &RunOptions<'_>,
    log: &DeployLog,
) -> Result<CommandOutput, DeployError> {
    run("bash", &["-lc", script], opts, log).await
}

async fn pump<R: AsyncRead + Unpin>(reader: R, log: &DeployLog) -> Result<String, DeployError> {
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();
    while let Some(line) = lines.next_line().await? {
        log.line(&line).await?;
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}
