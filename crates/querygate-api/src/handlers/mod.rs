//! HTTP request handlers for the gateway API

pub mod admin;
pub mod forward;
pub mod status;
