//! Dockhand - Entry Point
//!
//! A self-hosted deployment orchestrator. Clones registered projects, runs
//! their build pipelines, publishes releases atomically and wires nginx/pm2.

use dockhand::app::options::AppOptions;
use dockhand::app::run::run;
use dockhand::logs::{init_logging, LogOptions};

use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("dockhand {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let options = AppOptions::from_env();

    if let Err(e) = init_logging(LogOptions {
        log_level: options.log_level.clone(),
    }) {
        println!("Failed to initialize logging: {e}");
    }

    info!(
        "Starting dockhand (projects: {}, logs: {})",
        options.storage.projects_dir.display(),
        options.storage.logs_dir.display()
    );

    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run dockhand: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
