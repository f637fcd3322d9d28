use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sse_relay::auth::{JwksVerifier, TokenVerifier};
use sse_relay::config::{Cli, Config};
use sse_relay::metrics::RelayMetrics;
use sse_relay::server::routes::{build_router, AppState};
use sse_relay::upstream::mock::MockBackend;
use sse_relay::upstream::openai::OpenAiBackend;
use sse_relay::upstream::CompletionBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "sse_relay=debug,tower_http=debug"
    } else {
        "sse_relay=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("sse-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    // Fail fast: a missing key or JWKS URL is a deployment error, not a
    // per-request one.
    let secrets = config
        .resolve_secrets(cli.mock, |name| std::env::var(name).ok())
        .context("startup configuration incomplete")?;
    let config = Arc::new(config);

    info!(
        api_base = config.upstream.api_base,
        model = config.upstream.model,
        padding = ?config.relay.padding,
        auth = config.auth.enabled,
        mock = cli.mock,
        "Configuration loaded"
    );

    // Upstream client, constructed once and shared read-only.
    let backend: Arc<dyn CompletionBackend> = match secrets.api_key {
        Some(api_key) if !cli.mock => Arc::new(OpenAiBackend::new(api_key, &config.upstream)?),
        _ => {
            warn!("Using mock backend; no upstream calls will be made");
            Arc::new(MockBackend::new())
        }
    };

    let verifier: Option<Arc<dyn TokenVerifier>> = match (&secrets.jwks_url, config.auth.enabled) {
        (Some(jwks_url), true) => {
            let verifier = JwksVerifier::new(
                jwks_url.clone(),
                Duration::from_secs(config.auth.jwks_refresh_secs),
            )?;
            verifier.warm().await;
            Some(Arc::new(verifier) as Arc<dyn TokenVerifier>)
        }
        _ => {
            warn!("Authentication disabled; streaming endpoints are open");
            None
        }
    };

    let metrics = RelayMetrics::new()?;

    // Build application state.
    let state = Arc::new(AppState::new(backend, verifier, config.clone(), metrics));

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
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
