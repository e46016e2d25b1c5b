//! HTTP trigger surface
//!
//! - [`api`] - Routes, handlers and the response envelope
//! - [`config`] - Bind address and layer toggles
//!
//! The server owns nothing but an `Arc<Orchestrator>`; operators or OS cron
//! hit the stage endpoints, or the in-process ticker runs alongside.

pub mod api;
pub mod config;

pub use api::{create_router, ApiError, ApiResponse};
pub use config::{ConfigError, ServerConfig, ServerConfigBuilder};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::pipeline::{Orchestrator, PipelineTicker};

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Herald Server
// ============================================================================

pub struct HeraldServer {
    config: ServerConfig,
    state: AppState,
}

impl HeraldServer {
    pub fn new(config: ServerConfig, orchestrator: Arc<Orchestrator>) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            config,
            state: AppState::new(orchestrator),
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves
    ///
    /// With `enable_ticker` set, the pipeline ticker runs in the background
    /// and is stopped after the listener closes.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let ticker = if self.config.enable_ticker {
            let ticker = Arc::new(PipelineTicker::new(
                self.state.orchestrator.context().config.ticker.clone(),
                self.state.orchestrator.clone(),
            )?);
            let runner = ticker.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = runner.start().await {
                    tracing::error!(error = %e, "Ticker exited");
                }
            });
            Some((ticker, handle))
        } else {
            None
        };

        tracing::info!("Starting herald server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(ServerError::Serve)?;

        if let Some((ticker, handle)) = ticker {
            ticker.stop().await;
            let _ = handle.await;
        }

        tracing::info!("Herald server shutdown complete");
        Ok(())
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
            ticker_enabled: self.config.enable_ticker,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
    pub ticker_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        let flag = |on: bool| if on { "enabled" } else { "disabled" };
        format!(
            "Herald Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             CORS: {}\n\
             Request Logging: {}\n\
             Ticker: {}",
            "",
            self.bind_address,
            flag(self.cors_enabled),
            flag(self.request_logging_enabled),
            flag(self.ticker_enabled),
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization error: {0}")]
    Init(#[from] crate::error::Error),

    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
