//! Payload validation and path-safety checks

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::errors::DeployError;
use crate::models::project::EnvEntry;

const MAX_BRANCH_LEN: usize = 128;

/// Branch names: `[A-Za-z0-9._/-]{1,128}`.
pub fn validate_branch(branch: &str) -> Result<(), DeployError> {
    if branch.is_empty() || branch.len() > MAX_BRANCH_LEN {
        return Err(DeployError::Validation(format!(
            "branch must be 1-{MAX_BRANCH_LEN} characters"
        )));
    }
    if !branch
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'))
    {
        return Err(DeployError::Validation(
            "branch contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Repository URLs must be absolute HTTPS URLs with a host.
pub fn validate_repo_url(repo: &str) -> Result<Url, DeployError> {
    let url = Url::parse(repo)
        .map_err(|e| DeployError::Validation(format!("invalid repository URL: {e}")))?;
    if url.scheme() != "https" {
        return Err(DeployError::Validation(
            "repository URL must use https".to_string(),
        ));
    }
    if url.host_str().is_none() {
        return Err(DeployError::Validation(
            "repository URL has no host".to_string(),
        ));
    }
    Ok(url)
}

/// Derive a project id from the repository URL's last path segment.
pub fn slug_from_repo_url(url: &Url) -> Result<String, DeployError> {
    let segment = url
        .path_segments()
        .and_then(|s| s.filter(|p| !p.is_empty()).next_back())
        .ok_or_else(|| DeployError::Validation("repository URL has no path".to_string()))?;

    let name = segment.strip_suffix(".git").unwrap_or(segment);
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();

    if slug.is_empty() {
        return Err(DeployError::Validation(
            "repository name yields an empty project id".to_string(),
        ));
    }
    Ok(slug)
}

/// Resolve `.` and `..` components lexically, without touching the filesystem.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    out
}

/// Require that `candidate`, lexically normalized, stays under `base`.
///
/// Returns the normalized path. The candidate may equal the base.
pub fn ensure_within(base: &Path, candidate: &Path) -> Result<PathBuf, DeployError> {
    let base = normalize_lexical(base);
    let resolved = normalize_lexical(candidate);

    if resolved == base || resolved.starts_with(&base) {
        Ok(resolved)
    } else {
        Err(DeployError::PathEscape(format!(
            "{} is outside {}",
            candidate.display(),
            base.display()
        )))
    }
}

/// Deploy paths must be absolute and resolve under the web root.
pub fn validate_deploy_path(nginx_root: &Path, deploy_path: &str) -> Result<PathBuf, DeployError> {
    let path = Path::new(deploy_path);
    if !path.is_absolute() {
        return Err(DeployError::PathEscape(format!(
            "deploy path {deploy_path} is not absolute"
        )));
    }
    ensure_within(nginx_root, path)
}

/// Build-output paths, resolved against the repo root, must stay inside it.
pub fn validate_build_output(repo_root: &Path, build_output: &str) -> Result<PathBuf, DeployError> {
    let candidate = Path::new(build_output);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        repo_root.join(candidate)
    };
    ensure_within(repo_root, &resolved)
}

/// Env entries must have unique keys.
pub fn validate_env_entries(entries: &[EnvEntry]) -> Result<(), DeployError> {
    let mut seen = std::collections::HashSet::new();
    for entry in entries {
        if !seen.insert(entry.key.as_str()) {
            return Err(DeployError::Validation(format!(
                "duplicate env key {}",
                entry.key
            )));
        }
    }
    Ok(())
}

/// A stored secret entry can never become plain on update.
pub fn reject_secret_downgrade(
    existing: &[EnvEntry],
    updated: &[EnvEntry],
) -> Result<(), DeployError> {
    for old in existing.iter().filter(|e| e.is_secret) {
        if let Some(new) = updated.iter().find(|e| e.key == old.key) {
            if !new.is_secret {
                return Err(DeployError::SecretDowngrade(old.key.clone()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_charset() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("feature/x-1.2_rc").is_ok());
        assert!(validate_branch("").is_err());
        assert!(validate_branch("bad branch").is_err());
        assert!(validate_branch("bad;rm -rf").is_err());
        assert!(validate_branch(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_repo_url_scheme() {
        assert!(validate_repo_url("https://github.com/o/r").is_ok());
        assert!(validate_repo_url("http://github.com/o/r").is_err());
        assert!(validate_repo_url("git@github.com:o/r.git").is_err());
        assert!(validate_repo_url("not a url").is_err());
    }

    #[test]
    fn test_slug_from_repo_url() {
        let url = Url::parse("https://github.com/acme/My.Site.git").unwrap();
        assert_eq!(slug_from_repo_url(&url).unwrap(), "my-site");

        let url = Url::parse("https://github.com/acme/app/").unwrap();
        assert_eq!(slug_from_repo_url(&url).unwrap(), "app");

        let url = Url::parse("https://github.com").unwrap();
        assert!(slug_from_repo_url(&url).is_err());
    }

    #[test]
    fn test_deploy_path_containment() {
        let root = Path::new("/var/www");
        assert_eq!(
            validate_deploy_path(root, "/var/www/p1").unwrap(),
            PathBuf::from("/var/www/p1")
        );
        assert!(validate_deploy_path(root, "/var/www").is_ok());
        assert!(matches!(
            validate_deploy_path(root, "/etc/passwd"),
            Err(DeployError::PathEscape(_))
        ));
        assert!(matches!(
            validate_deploy_path(root, "/var/www/../../etc"),
            Err(DeployError::PathEscape(_))
        ));
        assert!(matches!(
            validate_deploy_path(root, "relative/path"),
            Err(DeployError::PathEscape(_))
        ));
    }

    #[test]
    fn test_prefix_sibling_is_rejected() {
        // /var/www-evil shares a string prefix with /var/www but is outside it.
        assert!(validate_deploy_path(Path::new("/var/www"), "/var/www-evil/p1").is_err());
    }

    #[test]
    fn test_build_output_containment() {
        let repo = Path::new("/srv/projects/p1/repo");
        assert_eq!(
            validate_build_output(repo, "build").unwrap(),
            PathBuf::from("/srv/projects/p1/repo/build")
        );
        assert!(validate_build_output(repo, ".").is_ok());
        assert!(matches!(
            validate_build_output(repo, "../../etc"),
            Err(DeployError::PathEscape(_))
        ));
        assert!(matches!(
            validate_build_output(repo, "/etc"),
            Err(DeployError::PathEscape(_))
        ));
    }

    #[test]
    fn test_duplicate_env_keys_rejected() {
        let entries = vec![
            EnvEntry {
                key: "A".into(),
                is_secret: false,
                value: Some("1".into()),
                encrypted_value: None,
            },
            EnvEntry {
                key: "A".into(),
                is_secret: false,
                value: Some("2".into()),
                encrypted_value: None,
            },
        ];
        assert!(validate_env_entries(&entries).is_err());
    }

    #[test]
    fn test_secret_downgrade_rejected() {
        let existing = vec![EnvEntry {
            key: "API_KEY".into(),
            is_secret: true,
            value: None,
            encrypted_value: Some("blob".into()),
        }];
        let updated = vec![EnvEntry {
            key: "API_KEY".into(),
            is_secret: false,
            value: Some("leaked".into()),
            encrypted_value: None,
        }];

        assert!(matches!(
            reject_secret_downgrade(&existing, &updated),
            Err(DeployError::SecretDowngrade(k)) if k == "API_KEY"
        ));

        let kept_secret = vec![EnvEntry {
            key: "API_KEY".into(),
            is_secret: true,
            value: Some("rotated".into()),
            encrypted_value: None,
        }];
        assert!(reject_secret_downgrade(&existing, &kept_secret).is_ok());
    }
}
