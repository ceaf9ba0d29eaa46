use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::rule::RecurrenceRule;
use crate::store::JobStore;
use crate::types::{Job, NewJob};
use crate::watermark::DispatchWatermark;

/// Registry-side job management.
///
/// Every mutation that can change which jobs are schedulable, or when,
/// rebuilds the dispatch watermark before returning.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn JobStore>,
    watermark: DispatchWatermark,
}

impl SchedulerHandle {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            watermark: DispatchWatermark::new(Arc::clone(&store)),
            store,
        }
    }

    /// Register a job. Its first due instant is `first_run`, or now.
    pub fn add_job(&self, new: NewJob) -> Result<Job> {
        new.rule.validate()?;
        let now = Utc::now();
        let job = Job {
            id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: new.name,
            handler: new.handler,
            group: new.group,
            rule: new.rule,
            active: true,
            group_enabled: true,
            next_run: new.first_run.unwrap_or_else(|| now.timestamp()),
            last_run: None,
            created_at: now.to_rfc3339(),
        };
        self.store.insert_job(&job)?;
        self.watermark.rebuild()?;
        info!(job_id = %job.id, name = %job.name, rule = %job.rule, "job added");

        // Re-read so group_enabled reflects the stored group state.
        Ok(self.store.get_job(&job.id)?.unwrap_or(job))
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        self.store.remove_job(id)?;
        self.watermark.rebuild()?;
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        self.store.set_active(id, active)?;
        self.watermark.rebuild()?;
        info!(job_id = %id, active, "job activity changed");
        Ok(())
    }

    /// Toggle an owning group. Member jobs keep their own `active` flag.
    pub fn set_group_enabled(&self, group: &str, enabled: bool) -> Result<()> {
        self.store.set_group_enabled(group, enabled)?;
        self.watermark.rebuild()?;
        info!(group, enabled, "job group toggled");
        Ok(())
    }

    /// Replace a job's rule. The stored `next_run` is kept; the new rule
    /// applies from the next claim onwards.
    pub fn set_rule(&self, id: &str, rule: &RecurrenceRule) -> Result<()> {
        rule.validate()?;
        self.store.set_rule(id, rule)?;
        self.watermark.rebuild()?;
        info!(job_id = %id, rule = %rule, "job rule changed");
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.store.get_job(id)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        self.store.list_jobs()
    }

    /// Jobs that are active and whose group is enabled.
    pub fn list_active_jobs(&self) -> Result<Vec<Job>> {
        self.store.list_active_jobs()
    }

    pub fn watermark(&self) -> &DispatchWatermark {
        &self.watermark
    }
}
