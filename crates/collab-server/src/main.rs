//! claude-collab: share one agent terminal with everyone who has the link.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use claude_collab::{build_router, AppState};
use collab_common::CollabError;
use collab_session::{AgentSpawner, GitAcquirer, SessionRegistry, SessionSettings};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "claude_collab=info,collab_session=info,collab_terminal=info";

#[derive(Parser)]
#[command(name = "claude-collab", version, about = "Shared terminal sessions for a CLI agent")]
struct Args {
    /// Port to listen on (0 picks a free port).
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `collab_session=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Shorthand for `--log-level debug`.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "claude-collab failed");
        eprintln!("claude-collab: {e}");
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) {
    let directive = if args.debug {
        Some("debug")
    } else {
        args.log_level.as_deref()
    };
    let filter = match directive {
        Some(d) => EnvFilter::try_new(d).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> Result<(), CollabError> {
    tracing::info!("claude-collab v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = collab_config::load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    let spawner = AgentSpawner::from_config(&config);
    if !std::path::Path::new(spawner.program()).is_absolute() {
        tracing::warn!(
            program = %spawner.program(),
            "agent binary not found on PATH; sessions will fail to start"
        );
    }

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let local = listener.local_addr()?;

    let settings = SessionSettings::from_config(&config, local.port());
    tracing::info!(
        data_dir = %settings.data_dir.display(),
        max_sessions = settings.max_sessions,
        "sessions configured"
    );
    let registry = SessionRegistry::new(settings, Arc::new(GitAcquirer), Arc::new(spawner));
    let state = AppState::new(&config, registry.clone())?;
    let app = build_router(state);

    tracing::info!("claude-collab listening on {local}");
    println!("claude-collab running at http://localhost:{}", local.port());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(registry))
    .await?;

    tracing::info!("claude-collab stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM once every session has been ended, so open
/// WebSockets are closed before the server drains.
async fn shutdown_signal(registry: SessionRegistry) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
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

    tracing::info!("shutting down, ending all sessions");
    registry.shutdown_all().await;
}
