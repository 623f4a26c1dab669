//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared [`AppState`] once at startup
//! - Create the Axum Router with the API routes
//! - Wire up middleware (request ID, tracing, timeout, body limit, pipeline)
//! - Serve until the shutdown coordinator fires

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, middleware, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::api;
use crate::config::EdgeConfig;
use crate::http::pipeline::request_pipeline;
use crate::http::request::{make_span, propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::security::{CsrfGuard, RateLimiter, RedirectSanitizer, TokenCodec};
use crate::services::Services;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The loader always fills the secret; reaching this means it was bypassed.
    #[error("CSRF secret is not configured")]
    MissingCsrfSecret,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers and the pipeline.
///
/// Built once per process; every component is shared behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EdgeConfig>,
    pub csrf: Arc<CsrfGuard>,
    pub limiter: Arc<RateLimiter>,
    pub redirects: Arc<RedirectSanitizer>,
    pub services: Services,
}

impl AppState {
    pub fn new(config: EdgeConfig, services: Services) -> Result<Self, ServerError> {
        let secret = config
            .csrf
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ServerError::MissingCsrfSecret)?;

        let codec = TokenCodec::new(secret.as_bytes(), config.csrf.token_ttl_ms);
        let csrf = CsrfGuard::new(&config.csrf, codec, config.is_production());
        let limiter = RateLimiter::in_memory(config.rate_limit.sweep_interval_ms);
        let redirects = RedirectSanitizer::new(&config.redirect);

        Ok(Self {
            config: Arc::new(config),
            csrf: Arc::new(csrf),
            limiter: Arc::new(limiter),
            redirects: Arc::new(redirects),
            services,
        })
    }
}

/// HTTP server for the edge.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: EdgeConfig, services: Services) -> Result<Self, ServerError> {
        let state = AppState::new(config, services)?;
        Ok(Self {
            router: Self::build_router(state),
        })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers listed last run first: request id, trace, timeout, body
    /// limit, then the pipeline around the routes.
    #[allow(deprecated)]
    pub fn build_router(state: AppState) -> Router {
        let timeout = Duration::from_secs(state.config.timeouts.request_secs);
        let body_limit = state.config.listener.max_body_bytes;

        api::routes()
            .layer(middleware::from_fn_with_state(state.clone(), request_pipeline))
            .with_state(state)
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TimeoutLayer::new(timeout))
            .layer(TraceLayer::new_for_http().make_span_with(make_span::<axum::body::Body>))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// The assembled router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = shutdown.subscribe();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
