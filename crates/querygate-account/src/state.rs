//! Current account holder

use parking_lot::RwLock;
use querygate_core::ResolvedAccount;
use tracing::{info, warn};

/// Holds the account every new environment bundle is composed from.
///
/// A degraded candidate never overwrites a recorded account; only a live
/// resolution (or the very first value) is accepted.
#[derive(Debug, Default)]
pub struct AccountState {
    current: RwLock<Option<ResolvedAccount>>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(account: ResolvedAccount) -> Self {
        Self {
            current: RwLock::new(Some(account)),
        }
    }

    /// Snapshot of the recorded account
    pub fn current(&self) -> Option<ResolvedAccount> {
        self.current.read().clone()
    }

    /// `true` until a live account has been recorded
    pub fn is_degraded(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .map_or(true, |account| account.degraded)
    }

    /// Offer a new resolution result.
    ///
    /// Returns whether `candidate` became the current account.
    pub fn accept(&self, candidate: ResolvedAccount) -> bool {
        let mut current = self.current.write();
        match current.as_ref() {
            Some(existing) if candidate.degraded => {
                warn!(
                    degraded = existing.degraded,
                    "Re-resolution fell back, keeping recorded account"
                );
                false
            }
            _ => {
                if !candidate.degraded {
                    info!(account = %candidate.masked_id(), "Recorded live account");
                }
                *current = Some(candidate);
                true
            }
        }
    }
}
