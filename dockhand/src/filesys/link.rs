//! Symlink operations
//!
//! The release-publication protocol flips `current`, `previous` and the deploy
//! path with unlink-then-symlink replacements. The replacement is not
//! crash-atomic, but a link is never left pointing at a stale target.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeployError;

/// Replace `link` so it points at `target`, creating parent directories.
pub async fn replace(link: &Path, target: &Path) -> Result<(), DeployError> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).await?;
    }

    if fs::symlink_metadata(link).await.is_ok() {
        fs::remove_file(link).await?;
    }

    fs::symlink(target, link).await?;
    Ok(())
}

/// Read the raw target of `link`, or `None` if the link does not exist.
pub async fn target(link: &Path) -> Result<Option<PathBuf>, DeployError> {
    match fs::read_link(link).await {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fully resolve `link` through the filesystem, or `None` if it does not exist.
pub async fn resolve(link: &Path) -> Result<Option<PathBuf>, DeployError> {
    match fs::canonicalize(link).await {
        Ok(t) => Ok(Some(t)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
