//! Application configuration options
//!
//! Plain option structs with defaults, hydrated from the environment by
//! `AppOptions::from_env()`.

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::{engine, nginx, pm2};
use crate::logs::LogLevel;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// HTTP listener configuration
    pub server: ServerOptions,

    /// Engine concurrency bounds
    pub engine: engine::Options,

    /// Storage paths
    pub storage: StorageOptions,

    /// Web-server paths
    pub nginx: nginx::Options,

    /// Process manager configuration
    pub pm2: pm2::Options,

    /// Master secret for the secrets codec; encrypt/decrypt fail while unset
    pub secrets_master_key: Option<String>,

    /// Optional bearer token mapped to the privileged admin identity
    pub admin_token: Option<String>,

    /// Process-wide log level
    pub log_level: LogLevel,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            server: ServerOptions::default(),
            engine: engine::Options::default(),
            storage: StorageOptions::default(),
            nginx: nginx::Options::default(),
            pm2: pm2::Options::default(),
            secrets_master_key: None,
            admin_token: None,
            log_level: LogLevel::Info,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Root for project directories and the deployments index
    pub projects_dir: PathBuf,

    /// Root for deployment log files
    pub logs_dir: PathBuf,

    /// Scratch space reported in the health config echo
    pub build_dir: PathBuf,

    /// Name of the per-project releases directory
    pub releases_dir_name: String,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("/var/deploy/projects"),
            logs_dir: PathBuf::from("/var/deploy/logs"),
            build_dir: PathBuf::from("/var/deploy/build"),
            releases_dir_name: "releases".to_string(),
        }
    }
}

/// HTTP listener options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8404,
        }
    }
}

impl AppOptions {
    /// Hydrate options from the environment.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(host) = env_string("HTTP_HOST") {
            options.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("HTTP_PORT") {
            options.server.port = port;
        }

        if let Some(n) = env_parse::<usize>("MAX_CONCURRENT_DEPLOYS") {
            options.engine.max_concurrent_deploys = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("MAX_QUEUE_SIZE") {
            options.engine.max_queue_size = n.max(1);
        }
        if let Some(output) = env_string("DEFAULT_BUILD_OUTPUT") {
            options.engine.default_build_output = output;
        }

        if let Some(dir) = env_string("PROJECTS_DIR") {
            options.storage.projects_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("LOGS_DIR") {
            options.storage.logs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("BUILD_DIR") {
            options.storage.build_dir = PathBuf::from(dir);
        }
        if let Some(name) = env_string("RELEASES_DIR_NAME") {
            options.storage.releases_dir_name = name;
        }

        if let Some(root) = env_string("NGINX_ROOT") {
            options.nginx.root = PathBuf::from(root);
        }
        if let Some(dir) = env_string("NGINX_SITES_AVAILABLE") {
            options.nginx.sites_available = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("NGINX_SITES_ENABLED") {
            options.nginx.sites_enabled = PathBuf::from(dir);
        }

        if let Some(bin) = env_string("PM2_BIN") {
            options.pm2.bin = bin;
        }

        options.secrets_master_key = env_string("SECRETS_MASTER_KEY");
        options.admin_token = env_string("ADMIN_TOKEN");

        if let Some(level) = env_string("LOG_LEVEL") {
            if let Ok(level) = level.parse() {
                options.log_level = level;
            }
        }

        options
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}
