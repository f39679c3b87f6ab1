//! Web-server config writer
//!
//! Renders a per-project site config into sites-available, enables it via a
//! sites-enabled symlink, then runs `nginx -t` and reloads. The config files
//! are shared with the host, so writes are idempotent.

use std::path::{Path, PathBuf};

use crate::deploy::runner::{run, DeployLog, RunOptions};
use crate::errors::DeployError;
use crate::filesys::{link, File};
use crate::models::project::{Project, Runtime};

/// Web-server paths
#[derive(Debug, Clone)]
pub struct Options {
    /// Web root every deploy path must live under
    pub root: PathBuf,
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/www"),
            sites_available: PathBuf::from("/etc/nginx/sites-available"),
            sites_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
        }
    }
}

pub fn config_name(project_id: &str) -> String {
    format!("deployer-{project_id}.conf")
}

/// Static runtime: serve the deploy path directly.
pub fn render_static(domain: Option<&str>, deploy_path: &str) -> String {
    let server_name = domain.unwrap_or("_");
    format!(
        "server {{\n    listen 80;\n    server_name {server_name};\n    root {deploy_path};\n    index index.html;\n\n    location / {{\n        try_files $uri /index.html;\n    }}\n}}\n"
    )
}

/// Node runtime: reverse-proxy to the assigned runtime port, with WebSocket
/// upgrade headers.
pub fn render_node(domain: Option<&str>, runtime_port: u16) -> String {
    let server_name = domain.unwrap_or("_");
    format!(
        "server {{\n    listen 80;\n    server_name {server_name};\n\n    location / {{\n        proxy_pass http://127.0.0.1:{runtime_port};\n        proxy_http_version 1.1;\n        proxy_set_header Upgrade $http_upgrade;\n        proxy_set_header Connection \"upgrade\";\n        proxy_set_header Host $host;\n        proxy_set_header X-Real-IP $remote_addr;\n        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n    }}\n}}\n"
    )
}

pub struct NginxWriter {
    options: Options,
}

impl NginxWriter {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    /// Render, install and reload the site config for a project.
    pub async fn install(
        &self,
        project: &Project,
        runtime_port: Option<u16>,
        log: &DeployLog,
        dry_run: bool,
    ) -> Result<(), DeployError> {
        let config = match project.runtime {
            Runtime::Static => {
                render_static(project.domain.as_deref(), &project.deploy_path)
            }
            Runtime::Node => {
                let port = runtime_port.ok_or_else(|| {
                    DeployError::ConfigIncomplete(
                        "runtimePort is required for the node template".to_string(),
                    )
                })?;
                render_node(project.domain.as_deref(), port)
            }
        };

        let name = config_name(&project.id);
        let available = self.options.sites_available.join(&name);
        let enabled = self.options.sites_enabled.join(&name);

        if dry_run {
            log.line(&format!(
                "[dry-run] would write nginx config {} and enable {}",
                available.display(),
                enabled.display()
            ))
            .await?;
        } else {
            File::new(&available).write_string(&config).await?;
            link::replace(&enabled, &available).await?;
            log.line(&format!("wrote nginx config {}", available.display()))
                .await?;
        }

        let opts = RunOptions {
            dry_run,
            ..Default::default()
        };
        run("nginx", &["-t"], &opts, log).await?;
        run("systemctl", &["reload", "nginx"], &opts, log).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_static() {
        let conf = render_static(Some("example.com"), "/var/www/site");
        assert!(conf.contains("server_name example.com;"));
        assert!(conf.contains("root /var/www/site;"));
        assert!(conf.contains("try_files $uri /index.html;"));

        let fallback = render_static(None, "/var/www/site");
        assert!(fallback.contains("server_name _;"));
    }

    #[test]
    fn test_render_node() {
        let conf = render_node(None, 4002);
        assert!(conf.contains("proxy_pass http://127.0.0.1:4002;"));
        assert!(conf.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(conf.contains("proxy_set_header Connection \"upgrade\";"));
    }

    #[test]
    fn test_config_name() {
        assert_eq!(config_name("site"), "deployer-site.conf");
    }
}
