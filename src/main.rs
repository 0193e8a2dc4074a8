use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};

use knowledge_assistant::app::{build_orchestrator, Backends};
use knowledge_assistant::config::Config;
use knowledge_assistant::db::{create_pool, run_migrations};
use knowledge_assistant::queue::WorkerPool;
use knowledge_assistant::routes::create_router;
use knowledge_assistant::utils::logger::init_logger;

#[derive(Parser)]
#[command(name = "knowledge-assistant", version, about = "Asynchronous question answering over technical documents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Run queue workers
    Worker {
        /// Number of concurrent workers in this process
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Run the API and workers in one process
    Standalone {
        /// Keep jobs and the queue in memory instead of Postgres and Redis
        #[arg(long)]
        in_memory: bool,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logger(&config.logging)?;
    info!(host = %config.server.host, port = config.server.port, "Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            let pool = create_pool(&config.database).await?;
            run_migrations(&pool).await?;
        }
        Command::Serve => {
            let pool = create_pool(&config.database).await?;
            run_migrations(&pool).await?;
            let backends = Backends::durable(&config, pool).await?;
            serve(&config, &backends).await?;
        }
        Command::Worker { concurrency } => {
            let pool = create_pool(&config.database).await?;
            let backends = Backends::durable(&config, pool.clone()).await?;
            let orchestrator = build_orchestrator(&config, pool, backends.store.clone())?;

            let workers = WorkerPool::spawn(
                concurrency.unwrap_or(config.worker.concurrency),
                backends.dispatcher.clone(),
                orchestrator,
                Duration::from_secs(config.worker.poll_timeout_secs),
            );

            shutdown_signal().await;
            workers.shutdown().await;
        }
        Command::Standalone { in_memory, concurrency } => {
            let pool = create_pool(&config.database).await?;
            run_migrations(&pool).await?;
            let backends = if in_memory {
                Backends::in_memory(&config)
            } else {
                Backends::durable(&config, pool.clone()).await?
            };
            let orchestrator = build_orchestrator(&config, pool, backends.store.clone())?;

            let workers = WorkerPool::spawn(
                concurrency.unwrap_or(config.worker.concurrency),
                backends.dispatcher.clone(),
                orchestrator,
                Duration::from_secs(config.worker.poll_timeout_secs),
            );

            let served = serve(&config, &backends).await;
            workers.shutdown().await;
            served?;
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn serve(config: &Config, backends: &Backends) -> anyhow::Result<()> {
    let app = create_router(backends.app_state(config));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
