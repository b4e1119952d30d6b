//! Resolved account model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing characters left visible by [`mask_account_id`]
const VISIBLE_SUFFIX: usize = 4;

/// Outcome of account resolution.
///
/// `degraded` is set when the id is the configured fallback rather than a
/// value obtained from the upstream account endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAccount {
    pub account_id: String,
    pub degraded: bool,
    pub resolved_at: DateTime<Utc>,
    /// Upstream calls made to produce this value
    pub attempts: u32,
}

impl ResolvedAccount {
    /// Account obtained from the upstream endpoint
    pub fn live(account_id: impl Into<String>, attempts: u32) -> Self {
        Self {
            account_id: account_id.into(),
            degraded: false,
            resolved_at: Utc::now(),
            attempts,
        }
    }

    /// Fallback account used after every attempt failed
    pub fn fallback(account_id: impl Into<String>, attempts: u32) -> Self {
        Self {
            account_id: account_id.into(),
            degraded: true,
            resolved_at: Utc::now(),
            attempts,
        }
    }

    pub fn masked_id(&self) -> String {
        mask_account_id(&self.account_id)
    }
}

/// Replace all but the last four characters with `*`.
///
/// Ids of four characters or fewer are masked entirely.
///
/// ```
/// # use querygate_core::mask_account_id;
/// assert_eq!(mask_account_id("1234567890"), "******7890");
/// assert_eq!(mask_account_id("123"), "***");
/// ```
pub fn mask_account_id(id: &str) -> String {
    let len = id.chars().count();
    if len <= VISIBLE_SUFFIX {
        return "*".repeat(len);
    }
    let hidden = len - VISIBLE_SUFFIX;
    id.chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}
