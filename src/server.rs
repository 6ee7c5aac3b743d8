//! HTTP server wiring: builds the tower middleware stack around the
//! assembled axum `Router` and serves it with graceful shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::Config,
    error::Result,
    middleware::{request_id_layer, request_id_propagation_layer, sensitive_headers_layer},
};

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wraps `app` in the gateway's middleware stack and serves it on
    /// `config.service.host:port` until a shutdown signal arrives. New
    /// connections stop being accepted as soon as the signal fires; axum
    /// waits for in-flight requests to complete before returning.
    pub async fn serve(self, app: Router) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.service.host, self.config.service.port)
            .parse()
            .map_err(|e| crate::error::Error::Internal(format!("invalid bind address: {e}")))?;

        tracing::info!(service = %self.config.service.name, %addr, "starting gateway HTTP adapter");

        let body_limit = self.config.security.max_request_size;
        let cors_layer = self.build_cors_layer();

        let app = app
            .layer(cors_layer)
            .layer(CompressionLayer::new())
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                self.config.router.timeout() + Duration::from_secs(1),
            ))
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .layer(sensitive_headers_layer())
            .layer(request_id_propagation_layer())
            .layer(request_id_layer())
            .layer(CatchPanicLayer::new());

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "gateway HTTP adapter listening");

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("gateway HTTP adapter shut down");
        Ok(())
    }

    /// Builds CORS from `config.service.cors_allowed_origins`. A bare `"*"`
    /// entry (the default) maps to permissive CORS; an explicit origin list
    /// restricts to exactly those origins.
    fn build_cors_layer(&self) -> CorsLayer {
        let origins = &self.config.service.cors_allowed_origins;
        if origins.iter().any(|o| o == "*") {
            return CorsLayer::permissive();
        }

        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse::<http::HeaderValue>().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

/// Waits for SIGINT or (on unix) SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let config = Config::default();
        let server = Server::new(config.clone());
        assert_eq!(server.config().service.port, config.service.port);
    }
}
