//! Admission webhook server
//!
//! Serves the `NetworkPerformanceTest` validating webhook and health probes. TLS is
//! used when a certificate and key are configured, plain HTTP otherwise.

pub mod spec_validator;

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::tasks::config::WebhookConfig;

pub use spec_validator::{validate_handler, validate_spec, ITERATIONS_DENIED_REASON};

/// Path registered in the ValidatingWebhookConfiguration
pub const VALIDATE_PATH: &str = "/validate-spec-v1alpha1-networkperformancetest";

/// Grace period for in-flight admission requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("webhook server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Router with the validating webhook and health endpoints
pub fn router() -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
}

/// Serve until `shutdown` is cancelled
pub async fn serve(config: &WebhookConfig, shutdown: CancellationToken) -> Result<(), WebhookError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = router();

    match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| WebhookError::Tls(format!("{cert_path}, {key_path}: {e}")))?;

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                }
            });

            info!(addr = %addr, "Starting admission webhook server (TLS)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(addr = %addr, "Starting admission webhook server (plain HTTP)");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;
        }
    }

    info!("Admission webhook server stopped");
    Ok(())
}
