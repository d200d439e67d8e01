//! Sliding-window admission against a shared attempt store.

use std::sync::Arc;

use tracing::{debug, trace};
use uuid::Uuid;

use super::clock::Clock;
use super::policy::{Admission, RatePolicy};
use crate::store::{AttemptStore, Batch, CommandReply, StoreError};

/// Position of the `RangeAll` reply inside the admission batch.
const RANGE_REPLY: usize = 1;

/// A `(max_calls, window)` policy bound to a store and a clock.
///
/// Holds no state between calls: every decision is made from the attempt
/// record in the store, so any number of processes can share one budget.
#[derive(Debug, Clone)]
pub struct RateWindow {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    policy: RatePolicy,
}

impl RateWindow {
    pub(crate) fn new(store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>, policy: RatePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// The policy this window enforces.
    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }

    /// Decide whether `identifier` may act now, and record the attempt.
    ///
    /// In one atomic batch this prunes attempts older than the window, reads
    /// what is left, records the current attempt and refreshes the record's
    /// expiry. The attempt is recorded whether or not it is admitted, so a
    /// caller hammering a closed window keeps it closed.
    ///
    /// Attempts are scored by time but stored under a unique member, so two
    /// attempts in the same nanosecond still count twice.
    ///
    /// # Errors
    /// Any store failure is returned as-is. It is never turned into an
    /// admission or a denial.
    pub async fn allowed(&self, identifier: &str) -> Result<Admission, StoreError> {
        let now = self.clock.now_nanos();
        let cutoff = now.saturating_sub(self.policy.window_nanos());

        let batch = Batch::new(identifier)
            .prune_older_than(cutoff)
            .range_all()
            .add_scored(now, attempt_member(now))
            .set_expiry(self.policy.expiry());

        let replies = self.store.execute(&batch).await?;
        let in_window = match replies.get(RANGE_REPLY) {
            Some(CommandReply::Members(members)) => members.len() as u64,
            other => {
                return Err(StoreError::UnexpectedReply {
                    command: "range_all",
                    detail: format!("{:?}", other),
                })
            }
        };

        let admission = self.policy.evaluate(in_window);

        trace!(
            identifier = %identifier,
            in_window = in_window,
            remaining = admission.remaining,
            "Evaluated sliding window"
        );

        if !admission.allowed {
            debug!(
                identifier = %identifier,
                max_calls = self.policy.max_calls(),
                window = ?self.policy.window(),
                "Rate limit exceeded"
            );
        }

        Ok(admission)
    }
}

fn attempt_member(now: i64) -> String {
    format!("{}-{}", now, Uuid::new_v4())
}
