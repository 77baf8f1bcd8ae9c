//! Imposter management.
//!
//! This module provides:
//! - `ImposterManager`: Lifecycle management for imposters
//! - `Imposter`: Individual imposter with its own port, stubs and injection state
//! - `ImposterConfig`: Configuration for creating imposters
//!
//! Each imposter binds to its own TCP port and maintains isolated state.
//!
//! ## Module Structure
//!
//! - `types`: Wire types and errors
//! - `stubs`: Ordered stub list with response cursors and proxy recording
//! - `response`: Rendering stored responses and recording origin responses
//! - `handler`: HTTP request handling for imposters
//! - `manager`: ImposterManager for lifecycle management
//! - `core`: Core Imposter struct and request resolution

mod core;
mod handler;
mod manager;
mod response;
mod stubs;
mod types;


pub use core::{EngineContext, Imposter};
pub use manager::ImposterManager;
pub use stubs::{Recorded, StubId, StubList};
pub use types::{
    Behaviors, ImposterConfig, ImposterError, IsResponse, ProxyMode, ProxyResponse,
    RecordedRequest, ResolveError, ResponseMode, Stub, StubResponse,
};
