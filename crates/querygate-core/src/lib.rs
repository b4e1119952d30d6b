//! querygate-core - Core types for the querygate gateway
//!
//! This crate holds the vocabulary shared by the supervisor, the account
//! resolver and the HTTP layer: managed server specs and lifecycle state,
//! resolved accounts and environment bundles, the static route table, and
//! the gateway error taxonomy. Nothing in here performs I/O.

pub mod environment;
pub mod error;
pub mod models;
pub mod routing;

pub use environment::EnvironmentComposer;
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use models::*;
pub use routing::{RouteTable, RESERVED_NAMES};
