// Library exports for the decoy binary and integration tests

// ===== Mountebank-compatible surface =====
pub mod admin_api;
pub mod config;
pub mod imposter;

// ===== Engine =====
pub mod canonical;
pub mod error;
pub mod predicate;
pub mod proxy;
pub mod scripting;
