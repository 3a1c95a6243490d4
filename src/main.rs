//! Legacy SOAP gateway binary.
//!
//! Run with: `legacy-soap-gateway --config config.yaml`

use anyhow::{Context, Result};
use clap::Parser;
use legacy_soap_gateway::auth::StaticCertificateStore;
use legacy_soap_gateway::proxy::ReqwestTransport;
use legacy_soap_gateway::responder::{SimplerResponder, UnavailableBackend};
use legacy_soap_gateway::{server, GatewayConfig, SoapGateway};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Compatibility gateway for the legacy grants SOAP API.
///
/// Forwards applicant and grantor SOAP traffic to the legacy service and
/// answers selected operations internally when configured to.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address, overriding the config file (e.g. "0.0.0.0:8080")
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting legacy SOAP gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    // Load configuration
    let mut config = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        GatewayConfig::from_yaml(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        GatewayConfig::default()
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    info!(
        base_url = %config.legacy.base_url,
        use_internal = config.internal.use_internal,
        certificates = config.certificates.len(),
        client_keys = config.client_keys.len(),
        "Configuration loaded"
    );

    let transport = Arc::new(ReqwestTransport::new().context("Failed to build HTTP client")?);
    let store = Arc::new(StaticCertificateStore::new(config.certificates.clone()));
    let responder = Arc::new(SimplerResponder::new(Arc::new(UnavailableBackend)));
    let gateway = SoapGateway::from_config(&config, transport, store, responder)
        .context("Failed to initialize gateway")?;

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    info!("Listening on {}", config.server.listen);

    axum::serve(listener, server::router(Arc::new(gateway)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Legacy SOAP gateway stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
    info!("Shutdown signal received, stopping server");
}
