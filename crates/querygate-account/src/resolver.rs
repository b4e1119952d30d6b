//! Account resolution with retry, backoff and degraded fallback

use std::sync::Arc;
use std::time::Duration;

use querygate_core::{mask_account_id, ResolvedAccount};
use tracing::{debug, info, warn};

use crate::error::AccountError;
use crate::source::AccountSource;

/// Account id used when the upstream endpoint cannot be reached
pub const DEFAULT_FALLBACK_ACCOUNT_ID: &str = "000000000000";

/// Retry policy for [`AccountResolver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Total upstream calls before falling back (at least one is made)
    pub attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Time budget for one upstream call
    pub attempt_timeout: Duration,
    /// Id reported when every attempt failed
    pub fallback_id: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(5),
            fallback_id: DEFAULT_FALLBACK_ACCOUNT_ID.to_string(),
        }
    }
}

/// Delay slept before the 1-based `attempt`.
///
/// The first attempt runs immediately; attempt `k >= 2` waits
/// `min(base * 2^(k-2), max)`.
///
/// ```
/// # use std::time::Duration;
/// # use querygate_account::backoff_delay;
/// let base = Duration::from_secs(1);
/// let max = Duration::from_secs(8);
/// assert_eq!(backoff_delay(1, base, max), Duration::ZERO);
/// assert_eq!(backoff_delay(2, base, max), Duration::from_secs(1));
/// assert_eq!(backoff_delay(4, base, max), Duration::from_secs(4));
/// assert_eq!(backoff_delay(9, base, max), Duration::from_secs(8));
/// ```
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let factor = 2u32.checked_pow(attempt - 2).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Resolves the tenant account id.
///
/// [`resolve`](Self::resolve) always returns: either the live id from the
/// first successful attempt, or the configured fallback marked as degraded.
pub struct AccountResolver {
    source: Arc<dyn AccountSource>,
    config: ResolverConfig,
}

impl AccountResolver {
    pub fn new(source: Arc<dyn AccountSource>, config: ResolverConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn resolve(&self) -> ResolvedAccount {
        let attempts = self.config.attempts.max(1);
        let mut last_error: Option<AccountError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay =
                    backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying account resolution"
                );
                tokio::time::sleep(delay).await;
            }

            let outcome =
                match tokio::time::timeout(self.config.attempt_timeout, self.source.fetch()).await
                {
                    Ok(result) => result,
                    Err(_) => Err(AccountError::Timeout(self.config.attempt_timeout)),
                };

            match outcome {
                Ok(account_id) => {
                    info!(
                        attempt,
                        account = %mask_account_id(&account_id),
                        "Account resolved"
                    );
                    return ResolvedAccount::live(account_id, attempt);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Account resolution attempt failed");
                    last_error = Some(e);
                }
            }
        }

        warn!(
            attempts,
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            fallback = %mask_account_id(&self.config.fallback_id),
            "Account resolution failed, continuing with fallback account (degraded)"
        );
        ResolvedAccount::fallback(self.config.fallback_id.clone(), attempts)
    }
}
