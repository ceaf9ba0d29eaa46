//! Persistence seam for jobs and the watermark cache.
//!
//! Every backend must implement [`JobStore::compare_and_set_next_run`] as a
//! single atomic conditional write; it is the only concurrency control the
//! scheduler relies on.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::rule::RecurrenceRule;
use crate::types::Job;

pub trait JobStore: Send + Sync {
    // --- registry side ----------------------------------------------------

    /// Insert a fully populated job. Fails with `InvalidRule` if the rule has
    /// out-of-range values and `DuplicateJob` if the id exists.
    fn insert_job(&self, job: &Job) -> Result<()>;

    /// Delete a job. `JobNotFound` if no row was removed.
    fn remove_job(&self, id: &str) -> Result<()>;

    fn set_active(&self, id: &str, active: bool) -> Result<()>;

    /// Enable or disable an owning group. Unknown groups are created.
    fn set_group_enabled(&self, group: &str, enabled: bool) -> Result<()>;

    /// Replace a job's rule. Validated like [`insert_job`](Self::insert_job).
    fn set_rule(&self, id: &str, rule: &RecurrenceRule) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Every job, schedulable or not, ordered by `next_run`.
    fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Jobs that are active and whose group is enabled, ordered by `next_run`.
    fn list_active_jobs(&self) -> Result<Vec<Job>>;

    // --- dispatch side ----------------------------------------------------

    /// Schedulable jobs with `next_run < now`, ordered by `next_run`.
    fn due_jobs(&self, now: i64) -> Result<Vec<Job>>;

    /// Atomically set `next_run = new` and `last_run = claimed_at` iff the
    /// stored `next_run` still equals `expected`. Returns whether exactly one
    /// record changed.
    fn compare_and_set_next_run(
        &self,
        id: &str,
        expected: i64,
        new: i64,
        claimed_at: i64,
    ) -> Result<bool>;

    /// Minimum `next_run` over schedulable jobs, `None` when there are none.
    fn min_active_next_run(&self) -> Result<Option<i64>>;

    // --- watermark cache --------------------------------------------------

    fn load_watermark(&self) -> Result<Option<i64>>;

    fn store_watermark(&self, value: i64) -> Result<()>;

    /// Store `min_active_next_run()` (or `never` when there is none) as the
    /// watermark and return it. The read and the write are one atomic step,
    /// so a concurrent rebuild can never overwrite a newer, lower minimum
    /// with a stale one.
    fn rebuild_watermark(&self, never: i64) -> Result<i64>;
}
