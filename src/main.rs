//! limitador-operator entry point.
//!
//! Wires configuration, JSON logging, the probe server and the Limitador
//! controller together, and stops on SIGINT or SIGTERM.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use limitador_operator::health::{HealthState, run_health_server};
use limitador_operator::{OperatorConfig, run_controller};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("limitador_operator=info".parse()?)
        .add_directive("kube=info".parse()?);
    tracing_subscriber::fmt().json().with_env_filter(filter).init();

    // must happen before the first TLS client is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let config = OperatorConfig::parse();
    info!(
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        health_port = config.health_port,
        requeue_seconds = config.requeue_seconds,
        version = env!("CARGO_PKG_VERSION"),
        "Starting limitador-operator"
    );

    let client = Client::try_default().await?;
    let health = Arc::new(HealthState::new());

    let server = tokio::spawn(run_health_server(health.clone(), config.health_port));

    // Dropping the controller future on shutdown aborts any in-flight pass.
    tokio::select! {
        () = run_controller(client, &config, Some(health.clone())) => {
            error!("Controller exited");
        }
        result = server => {
            match result {
                Ok(Ok(())) => error!("Health server exited"),
                Ok(Err(e)) => error!(error = %e, "Health server failed"),
                Err(e) => error!(error = %e, "Health server task panicked"),
            }
        }
        result = shutdown_signal() => {
            result?;
            info!("Shutdown signal received");
        }
    }

    health.set_ready(false);
    info!("limitador-operator stopped");
    Ok(())
}

/// Resolve on the first SIGINT or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
