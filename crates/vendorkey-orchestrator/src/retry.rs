//! Bounded fixed-delay retry

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

/// Attempt count and fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    /// Resuming from the payer's checkout redirect
    pub const REDIRECT: Self = Self::new(10, 5000);

    /// Interactive status checks
    pub const INTERACTIVE: Self = Self::new(3, 1000);

    pub const fn new(attempts: u32, delay_ms: u64) -> Self {
        Self { attempts, delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Run `check` until it reports true or the policy is exhausted
///
/// A failed attempt counts against the budget like a negative one. There is
/// no delay after the last attempt.
pub async fn poll_until<F, Fut>(policy: RetryPolicy, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=policy.attempts {
        match check().await {
            Ok(true) => {
                debug!(attempt, "Check satisfied");
                return Ok(());
            }
            Ok(false) => debug!(attempt, max = policy.attempts, "Check not satisfied yet"),
            Err(e) => warn!(attempt, max = policy.attempts, "Check failed: {}", e),
        }

        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay()).await;
        }
    }

    Err(OrchestratorError::ActivationTimeout {
        attempts: policy.attempts,
    })
}
