use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::schedule::compute_next_run;
use crate::store::JobStore;
use crate::types::Job;

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the due instant; `next_run` is the value it wrote.
    Claimed { next_run: i64 },
    /// Another caller advanced the job first. The job must not be run.
    Lost,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed { .. })
    }
}

/// Claims due job instants with a single compare-and-set on `next_run`.
///
/// No locks are held beyond the store's own conditional write, and a lost
/// race is never retried here.
#[derive(Clone)]
pub struct ClaimCoordinator {
    store: Arc<dyn JobStore>,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Try to take the instant `job.next_run` (as observed by the caller),
    /// advancing the stored value to the rule's next run after `now`.
    pub fn try_claim(&self, job: &Job, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let next_run = compute_next_run(&job.rule, now).timestamp();
        let won = self.store.compare_and_set_next_run(
            &job.id,
            job.next_run,
            next_run,
            now.timestamp(),
        )?;
        if won {
            debug!(job_id = %job.id, observed = job.next_run, next_run, "claim won");
            Ok(ClaimOutcome::Claimed { next_run })
        } else {
            debug!(job_id = %job.id, observed = job.next_run, "claim lost");
            Ok(ClaimOutcome::Lost)
        }
    }
}
