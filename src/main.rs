use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use jarvis_ai_gateway::config::{Cli, Config};
use jarvis_ai_gateway::server::openai_api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "jarvis_ai_gateway=debug,tower_http=debug"
    } else {
        "jarvis_ai_gateway=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("jarvis-ai-gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?.apply_cli(&cli);
    let config = Arc::new(config);

    info!(
        listen = %config.server.listen,
        backend = %config.backend.base_url,
        chat_timeout_secs = config.backend.chat_timeout_secs,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(config.clone())?);
    let app = build_router(state);

    let listener = TcpListener::bind(&config.server.listen).await?;
    info!("Listening on {}", config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
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
