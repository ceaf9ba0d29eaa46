use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Result, SchedulerError};
use crate::rule::RecurrenceRule;
use crate::store::JobStore;
use crate::types::Job;

/// Process-local [`JobStore`].
///
/// The claim takes the DashMap shard write lock for the job's key, so the
/// compare and the assignment happen under one fine-grained lock.
#[derive(Default)]
pub struct MemoryStore {
    jobs: DashMap<String, Job>,
    /// Group name → enabled. Absent groups are enabled.
    groups: DashMap<String, bool>,
    watermark: Mutex<Option<i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_enabled(&self, group: Option<&str>) -> bool {
        group.map_or(true, |g| self.groups.get(g).map_or(true, |e| *e))
    }

    /// Snapshot jobs matching `keep`, with `group_enabled` filled in.
    fn collect(&self, keep: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .map(|e| {
                let mut job = e.value().clone();
                job.group_enabled = self.group_enabled(job.group.as_deref());
                job
            })
            .filter(|job| keep(job))
            .collect();
        jobs.sort_by(|a, b| a.next_run.cmp(&b.next_run).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    fn with_job(&self, id: &str, f: impl FnOnce(&mut Job)) -> Result<()> {
        match self.jobs.get_mut(id) {
            Some(mut job) => {
                f(job.value_mut());
                Ok(())
            }
            None => Err(SchedulerError::JobNotFound { id: id.to_string() }),
        }
    }
}

impl JobStore for MemoryStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        job.rule.validate()?;
        match self.jobs.entry(job.id.clone()) {
            Entry::Occupied(_) => Err(SchedulerError::DuplicateJob { id: job.id.clone() }),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    fn remove_job(&self, id: &str) -> Result<()> {
        self.jobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    fn set_active(&self, id: &str, active: bool) -> Result<()> {
        self.with_job(id, |job| job.active = active)
    }

    fn set_group_enabled(&self, group: &str, enabled: bool) -> Result<()> {
        self.groups.insert(group.to_string(), enabled);
        Ok(())
    }

    fn set_rule(&self, id: &str, rule: &RecurrenceRule) -> Result<()> {
        rule.validate()?;
        self.with_job(id, |job| job.rule = rule.clone())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(id).map(|e| {
            let mut job = e.value().clone();
            job.group_enabled = self.group_enabled(job.group.as_deref());
            job
        }))
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.collect(|_| true))
    }

    fn list_active_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.collect(Job::is_schedulable))
    }

    fn due_jobs(&self, now: i64) -> Result<Vec<Job>> {
        Ok(self.collect(|job| job.is_due(now)))
    }

    fn compare_and_set_next_run(
        &self,
        id: &str,
        expected: i64,
        new: i64,
        claimed_at: i64,
    ) -> Result<bool> {
        match self.jobs.get_mut(id) {
            Some(mut job) if job.next_run == expected => {
                job.next_run = new;
                job.last_run = Some(claimed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn min_active_next_run(&self) -> Result<Option<i64>> {
        Ok(self
            .jobs
            .iter()
            .filter(|e| e.active && self.group_enabled(e.group.as_deref()))
            .map(|e| e.next_run)
            .min())
    }

    fn load_watermark(&self) -> Result<Option<i64>> {
        Ok(*self.watermark.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn store_watermark(&self, value: i64) -> Result<()> {
        *self.watermark.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
        Ok(())
    }

    fn rebuild_watermark(&self, never: i64) -> Result<i64> {
        // Held across the scan so rebuilds apply in the order they observed.
        let mut mark = self.watermark.lock().unwrap_or_else(|e| e.into_inner());
        let value = self.min_active_next_run()?.unwrap_or(never);
        *mark = Some(value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, next_run: i64) -> Job {
        Job {
            id: id.to_string(),
            name: id.to_string(),
            handler: "noop".to_string(),
            group: None,
            rule: RecurrenceRule::every_minute(),
            active: true,
            group_enabled: true,
            next_run,
            last_run: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn due_and_min_respect_flags() {
        let store = MemoryStore::new();
        store.insert_job(&job("a", 10)).unwrap();
        let mut grouped = job("b", 5);
        grouped.group = Some("off".to_string());
        store.insert_job(&grouped).unwrap();
        store.insert_job(&job("c", 7)).unwrap();
        store.set_active("c", false).unwrap();
        store.set_group_enabled("off", false).unwrap();

        let due: Vec<String> = store.due_jobs(100).unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(due, vec!["a"]);
        assert_eq!(store.min_active_next_run().unwrap(), Some(10));
        assert_eq!(store.list_jobs().unwrap().len(), 3);
        assert!(!store.get_job("b").unwrap().unwrap().group_enabled);
    }

    #[test]
    fn compare_and_set_is_exclusive_across_threads() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.insert_job(&job("a", 100)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || store.compare_and_set_next_run("a", 100, 200 + i, 150).unwrap())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert!(store.get_job("a").unwrap().unwrap().next_run >= 200);
    }

    #[test]
    fn duplicate_and_missing_ids() {
        let store = MemoryStore::new();
        store.insert_job(&job("a", 1)).unwrap();
        assert!(matches!(
            store.insert_job(&job("a", 2)),
            Err(SchedulerError::DuplicateJob { .. })
        ));
        store.remove_job("a").unwrap();
        assert!(matches!(
            store.remove_job("a"),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[test]
    fn out_of_range_rules_are_rejected() {
        let store = MemoryStore::new();
        let mut bad = job("a", 1);
        bad.rule = RecurrenceRule::every_minute().with_minutes([-100]);
        assert!(matches!(
            store.insert_job(&bad),
            Err(SchedulerError::InvalidRule(_))
        ));
        assert!(store.get_job("a").unwrap().is_none());

        store.insert_job(&job("b", 1)).unwrap();
        assert!(matches!(
            store.set_rule("b", &RecurrenceRule::every_minute().with_hours([i32::MIN])),
            Err(SchedulerError::InvalidRule(_))
        ));
        assert_eq!(store.get_job("b").unwrap().unwrap().rule, RecurrenceRule::every_minute());
    }

    #[test]
    fn rebuild_watermark_settles_on_minimum_under_contention() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8i64)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        let next_run = 10_000 - i * 100 - n;
                        store.insert_job(&job(&format!("{i}-{n}"), next_run)).unwrap();
                        store.rebuild_watermark(i64::MAX).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let min = store.min_active_next_run().unwrap().unwrap();
        assert_eq!(min, 10_000 - 700 - 24);
        assert_eq!(store.load_watermark().unwrap(), Some(min));
    }

    #[test]
    fn watermark_defaults_to_none() {
        let store = MemoryStore::new();
        assert_eq!(store.load_watermark().unwrap(), None);
        store.store_watermark(9).unwrap();
        assert_eq!(store.load_watermark().unwrap(), Some(9));
    }
}
