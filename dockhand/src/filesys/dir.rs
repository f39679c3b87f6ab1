//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::DeployError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List subdirectories
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, DeployError> {
        let mut dirs = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }

        Ok(dirs)
    }
}

/// Recursively copy a directory tree.
///
/// Regular files and directories are copied; anything else (sockets, device
/// nodes) is skipped.
pub fn copy_recursive<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DeployError>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(dst).await?;

        let mut entries = fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = dst.join(entry.file_name());
            let meta = entry.metadata().await?;

            if meta.is_dir() {
                copy_recursive(&from, &to).await?;
            } else if meta.is_file() {
                fs::copy(&from, &to).await?;
            }
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_recursive_preserves_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("assets")).await.unwrap();
        fs::write(src.join("index.html"), "<html>").await.unwrap();
        fs::write(src.join("assets").join("app.js"), "void 0")
            .await
            .unwrap();

        let dst = tmp.path().join("dst");
        copy_recursive(&src, &dst).await.unwrap();

        assert_eq!(
            fs::read_to_string(dst.join("index.html")).await.unwrap(),
            "<html>"
        );
        assert_eq!(
            fs::read_to_string(dst.join("assets").join("app.js"))
                .await
                .unwrap(),
            "void 0"
        );
    }
}
