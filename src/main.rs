// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use op_connect_server::{
    api::router,
    auth::AuthConfig,
    config::{AppConfig, LOG_FORMAT_ENV},
    connect::{ConnectService, ConnectSettings},
    providers::{build_mtls_client, AisClient},
    signing::RequestObjectSigner,
    state::AppState,
    storage::RedbPendingStore,
};

/// Grace period for in-flight requests after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    // Apply .env before reading logging settings
    let dotenv = dotenvy::dotenv();
    init_tracing();
    match dotenv {
        Ok(path) => info!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {
            info!("No .env file found, relying on environment variables")
        }
        Err(e) => warn!(error = %e, "Ignoring unreadable .env file"),
    }

    if let Err(e) = run().await {
        error!(error = %e, "OP connect server failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
}

async fn run() -> Result<(), BoxError> {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    let config = AppConfig::from_env()?;
    info!(?config, "configuration loaded");

    // Fatal at startup: unusable key material never reaches the request path
    let http = build_mtls_client(&config.op.qwac_cert_path, &config.op.qwac_key_path)?;
    let signer = RequestObjectSigner::from_pem_file(&config.op.qseal_key_path, &config.op.qseal_kid)?;
    info!(kid = signer.kid(), "QSEAL signing key loaded");

    let db_path = config.server.pending_db_path();
    let store = RedbPendingStore::open(&db_path)?;
    info!(path = %db_path.display(), "pending authorization store opened");

    let connect = ConnectService::new(
        AisClient::new(http, &config.op),
        signer,
        store,
        ConnectSettings::from_config(&config.op),
    );
    let state = AppState::new(connect, AuthConfig::hs256(&config.jwt_secret))
        .with_data_dir(&config.server.data_dir);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    match (&config.server.tls_cert_path, &config.server.tls_key_path) {
        (Some(cert), Some(key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            info!("OP connect server listening on https://{addr} (docs at /docs)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            info!("OP connect server listening on http://{addr} (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    info!("OP connect server stopped");
    Ok(())
}

async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received, draining connections"),
        Err(e) => {
            // Without a signal listener the server runs until killed
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
