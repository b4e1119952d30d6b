//! querygate-account - Tenant account resolution
//!
//! Every managed server needs the tenant account id. This crate fetches it
//! from an upstream endpoint with bounded retries and exponential backoff,
//! and falls back to a fixed id (flagged as degraded) when the endpoint
//! stays unreachable. Resolution never fails and never blocks indefinitely.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use querygate_account::{AccountResolver, HttpAccountSource, ResolverConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = HttpAccountSource::new("http://localhost:9000/account")?;
//!     let resolver = AccountResolver::new(Arc::new(source), ResolverConfig::default());
//!
//!     let account = resolver.resolve().await;
//!     if account.degraded {
//!         println!("running with fallback account");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module runs axum routers on ephemeral ports:
//!
//! ```rust,ignore
//! use querygate_account::testing::TestServer;
//!
//! let server = TestServer::start(router).await?;
//! let source = HttpAccountSource::new(&server.url("/account"))?;
//! ```

mod error;
mod resolver;
mod source;
mod state;
pub mod testing;

pub use error::{AccountError, AccountResult};
pub use resolver::{backoff_delay, AccountResolver, ResolverConfig, DEFAULT_FALLBACK_ACCOUNT_ID};
pub use source::{extract_account_id, AccountSource, HttpAccountSource, DEFAULT_ACCOUNT_FIELD};
pub use state::AccountState;
