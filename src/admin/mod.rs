//! Administration endpoint.
//!
//! `GET /admin/status` behind bearer auth, served on its own listener while the
//! administration subsystem is started.

pub mod auth;
pub mod handlers;

use std::io;
use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::get_status;
use crate::config::AdminConfig;
use crate::lifecycle::startup::ServiceContext;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid admin address `{address}`: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to bind admin endpoint {address}: {source}")]
    Bind { address: SocketAddr, source: io::Error },

    #[error("admin endpoint failed: {0}")]
    Serve(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct AdminState {
    pub context: ServiceContext,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running admin endpoint.
#[derive(Debug)]
pub struct AdminServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<io::Result<()>>,
}

impl AdminServer {
    pub async fn start(config: &AdminConfig, context: ServiceContext) -> Result<Self, AdminError> {
        let address: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|source| AdminError::Address {
                address: config.bind_address.clone(),
                source,
            })?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| AdminError::Bind { address, source })?;
        let local_addr = listener.local_addr()?;

        if config.api_key == crate::config::schema::DEFAULT_ADMIN_API_KEY {
            tracing::warn!("Admin endpoint is using the default API key");
        }

        let app = setup_admin_router(AdminState { context });
        let (shutdown, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|stop| *stop).await;
                })
                .await
        });

        tracing::info!(address = %local_addr, "Admin endpoint listening");
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(self) -> Result<(), AdminError> {
        let _ = self.shutdown.send(true);
        let result = match self.task.await {
            Ok(result) => result.map_err(AdminError::Serve),
            Err(e) => Err(AdminError::Serve(io::Error::other(e))),
        };
        tracing::info!("Admin endpoint stopped");
        result
    }
}
