//! Rightsizer web surface
//!
//! Exposes the updater's liveness as a plain-text health check that an
//! external supervisor can poll.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod error;
mod health;
mod server;

pub use error::{Error, Result};
pub use health::{HEALTH_CHECK_PATH, health_router};
pub use server::{bind, serve};
