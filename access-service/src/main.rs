use access_service::{
    build_router,
    config::{AccessConfig, Environment},
    db,
    services::{
        metrics, CertificateAuthority, ExpirySweeper, HttpCertificateAuthority,
        HttpSplashController, MockCertificateAuthority, SplashController,
    },
    AppState,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    metrics::init_metrics().map_err(AppError::InternalError)?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting access service"
    );

    let stores = db::open_stores(&config.database).await?;

    let ca: Arc<dyn CertificateAuthority> = match config.certificate_authority.base_url.as_deref() {
        Some(base_url) => Arc::new(
            HttpCertificateAuthority::new(
                base_url,
                config.certificate_authority.api_token.expose_secret(),
                Duration::from_secs(config.certificate_authority.timeout_secs),
            )
            .map_err(AppError::ConfigError)?,
        ),
        None if config.environment == Environment::Dev => {
            tracing::warn!("CA_BASE_URL not set; certificates are issued by an in-process mock");
            Arc::new(MockCertificateAuthority::new())
        }
        None => {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CA_BASE_URL is required"
            )))
        }
    };

    let controller: Arc<dyn SplashController> = Arc::new(
        HttpSplashController::new(Duration::from_secs(config.controller.timeout_secs))
            .map_err(AppError::ConfigError)?,
    );

    let state = AppState::new(config.clone(), stores, ca, controller)?;

    let sweeper = ExpirySweeper::new(
        state.issuer.clone(),
        Duration::from_secs(config.sweeper.interval_secs),
    );
    let sweeper_shutdown = sweeper.shutdown_token();
    let sweeper_handle = sweeper.start();

    let app = build_router(state);

    let addr = config.common.socket_addr()?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    // In-flight requests get the grace period to complete.
    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);
    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(grace_seconds = grace.as_secs(), "Grace period elapsed; dropping open connections");
        }
    }

    sweeper_shutdown.cancel();
    if let Err(e) = sweeper_handle.await {
        tracing::error!(error = %e, "Expiry sweeper task failed");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
