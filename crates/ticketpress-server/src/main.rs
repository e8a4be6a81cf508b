// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ticketpress — print job queue daemon for restaurant QR ordering
//
// Entry point. Loads configuration, initialises logging and backend
// services, runs the print worker, and serves the HTTP API until Ctrl-C.

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use ticketpress_core::config::data_dir;
use ticketpress_core::error::Result;
use ticketpress_core::AppConfig;
use ticketpress_server::{AppServices, router};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load(&data_dir()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ticketpress: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Ticketpress starting");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "ticketpress exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let services = AppServices::init(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(services.print_worker()?.run(shutdown_rx));

    let listener = TcpListener::bind(&services.config().bind_address).await?;
    info!(addr = %listener.local_addr()?, "HTTP ingress listening");

    axum::serve(listener, router(services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the in-flight delivery, if any, finish before exiting.
    if shutdown_tx.send(true).is_err() {
        debug!("print worker already exited before shutdown signal");
    }
    if let Err(e) = worker.await {
        error!(error = %e, "print worker task panicked");
    }

    info!("Ticketpress stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!(error = %e, "cannot listen for Ctrl-C; shutting down"),
    }
}
