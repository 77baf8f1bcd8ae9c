//! Admin REST API for imposter management.
//!
//! This module provides a Mountebank-compatible REST API for:
//! - Creating, deleting, and listing imposters
//! - Adding, replacing and deleting stubs within imposters
//!
//! The API listens on a configurable port (default: 2525).

mod handlers;
mod router;
mod server;
mod types;

pub use server::{serve, AdminApiServer};
pub use types::status_for;
