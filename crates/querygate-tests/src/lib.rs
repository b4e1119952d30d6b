//! End-to-end tests for querygate
//!
//! The tests start the real `querygated` binary with a generated TOML
//! config whose managed servers are `querygate-demo-server` processes, then
//! drive the gateway over HTTP and raw TCP.
//!
//! # Running Tests
//!
//! Both binaries must be built first; tests skip themselves otherwise:
//!
//! ```bash
//! cargo build -p querygated -p querygate-demo-server
//! cargo test -p querygate-tests -- --test-threads=1
//! ```
//!
//! # Test Structure
//!
//! - `daemon_e2e_test.rs` - forwarding, status, restart and shutdown through
//!   the daemon

// This crate only contains tests, no library code
