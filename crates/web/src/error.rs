//! Errors from the health-check server.

use std::io;
use std::net::SocketAddr;

pub type Result<T> = std::result::Result<T, Error>;

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind health-check address {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("health-check server failed: {0}")]
    Serve(#[from] io::Error),
}
