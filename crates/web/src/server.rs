//! Listener setup and serving

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::{Error, Result};

/// Bind the health-check listener.
///
/// Binding is split from serving so an unusable address fails startup
/// before the control loop begins.
///
/// # Errors
///
/// Returns [`Error::Bind`] if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;
    info!("Health check listening on {}", addr);
    Ok(listener)
}

/// Serve `router` on an already bound listener until the task is dropped.
///
/// # Errors
///
/// Returns [`Error::Serve`] if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    axum::serve(listener, router).await?;
    Ok(())
}
