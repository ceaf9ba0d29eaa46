use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::JobStore;
use crate::types::WATERMARK_NEVER;

/// Cached minimum `next_run` across schedulable jobs.
///
/// Callers compare `now` against [`get`](Self::get) to skip the due query
/// when nothing can be due. Correctness never depends on it being fresh; a
/// stale value only costs an extra query or a later pickup.
#[derive(Clone)]
pub struct DispatchWatermark {
    store: Arc<dyn JobStore>,
}

impl DispatchWatermark {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Recompute from current job state, persist, and return the value.
    /// [`WATERMARK_NEVER`] when no job is schedulable.
    pub fn rebuild(&self) -> Result<i64> {
        let value = self.store.rebuild_watermark(WATERMARK_NEVER)?;
        debug!(watermark = value, "dispatch watermark rebuilt");
        Ok(value)
    }

    /// Last persisted value. `0` if nothing was ever persisted, so the first
    /// pass always queries.
    pub fn get(&self) -> Result<i64> {
        Ok(self.store.load_watermark()?.unwrap_or(0))
    }

    /// Whether a due query is worth running at `now` (Unix seconds).
    pub fn is_due(&self, now: i64) -> Result<bool> {
        Ok(now >= self.get()?)
    }
}
