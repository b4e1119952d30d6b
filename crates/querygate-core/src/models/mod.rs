//! Shared data models for the gateway

mod account;
mod bundle;
mod server;

pub use account::*;
pub use bundle::*;
pub use server::*;
