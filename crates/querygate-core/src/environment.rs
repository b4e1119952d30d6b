//! Environment bundle composition
//!
//! Turns a resolved account plus static backend configuration into the
//! bundle every managed server is launched with.

use std::collections::BTreeMap;

use crate::models::{EnvironmentBundle, ResolvedAccount, SecretRef};

/// Console name used in this deployment mode
pub const CONSOLE_NAME: &str = "default";

/// Builds [`EnvironmentBundle`]s from a resolved account
#[derive(Debug, Clone, Default)]
pub struct EnvironmentComposer {
    backend_urls: BTreeMap<String, String>,
    secret: SecretRef,
}

impl EnvironmentComposer {
    pub fn new(backend_urls: BTreeMap<String, String>, secret: SecretRef) -> Self {
        Self {
            backend_urls,
            secret,
        }
    }

    /// Compose the bundle for `account`. Pure: no I/O, same input, same output.
    pub fn compose(&self, account: &ResolvedAccount) -> EnvironmentBundle {
        EnvironmentBundle {
            account: account.clone(),
            console_name: CONSOLE_NAME.to_string(),
            backend_urls: self.backend_urls.clone(),
            secret: self.secret.clone(),
        }
    }
}
