use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cronlatch_core::SchedulerConfig;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, trace};

use crate::dispatcher::Dispatcher;
use crate::types::PassReport;

/// Drives [`Dispatcher::run_due_pass`] on a fixed interval.
///
/// This is one way to embed the scheduler (a dedicated worker). Request
/// handlers can just as well call `run_due_pass` themselves; both can run
/// against the same store at once.
pub struct SchedulerEngine {
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
}

impl SchedulerEngine {
    pub fn new(dispatcher: Arc<Dispatcher>, poll_interval: Duration) -> Self {
        Self {
            dispatcher,
            poll_interval,
        }
    }

    pub fn from_config(dispatcher: Arc<Dispatcher>, cfg: &SchedulerConfig) -> Self {
        Self::new(dispatcher, Duration::from_secs(cfg.poll_interval_secs.max(1)))
    }

    /// Main event loop. Polls until `shutdown` broadcasts `true` or its
    /// sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.poll_interval.as_secs(), "scheduler engine started");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one pass on the blocking pool, since handlers are synchronous.
    /// Errors are logged and swallowed so the loop keeps going.
    pub async fn tick(&self) -> Option<PassReport> {
        let dispatcher = Arc::clone(&self.dispatcher);
        match tokio::task::spawn_blocking(move || dispatcher.run_due_pass(Utc::now())).await {
            Ok(Ok(report)) => {
                if report.claimed > 0 {
                    info!(
                        claimed = report.claimed,
                        lost = report.lost,
                        failed = report.failed,
                        unresolved = report.unresolved,
                        "scheduler pass finished"
                    );
                } else {
                    trace!(gated = report.gated, due = report.due, "scheduler pass idle");
                }
                Some(report)
            }
            Ok(Err(e)) => {
                error!("scheduler pass error: {e}");
                None
            }
            Err(e) => {
                error!("scheduler pass task failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::HandlerRegistry;
    use crate::rule::RecurrenceRule;
    use crate::store::{JobStore, MemoryStore};
    use crate::types::Job;

    fn engine_with_due_job() -> (SchedulerEngine, Arc<AtomicUsize>) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_job(&Job {
                id: "j".to_string(),
                name: "j".to_string(),
                handler: "count".to_string(),
                group: None,
                rule: RecurrenceRule::every_minute(),
                active: true,
                group_enabled: true,
                next_run: Utc::now().timestamp() - 120,
                last_run: None,
                created_at: String::new(),
            })
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let registry = Arc::new(HandlerRegistry::new());
        registry.register_fn("count", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let dispatcher = Arc::new(Dispatcher::new(store, registry));
        (SchedulerEngine::new(dispatcher, Duration::from_millis(20)), hits)
    }

    #[tokio::test]
    async fn tick_runs_a_pass() {
        let (engine, hits) = engine_with_due_job();
        let report = engine.tick().await.expect("pass succeeded");
        assert_eq!(report.claimed, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Claimed instant is gone; the next tick is gated.
        let again = engine.tick().await.expect("pass succeeded");
        assert!(again.gated);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (engine, hits) = engine_with_due_job();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(engine.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("engine stopped")
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_config_uses_poll_interval() {
        let (engine, _) = engine_with_due_job();
        let cfg = SchedulerConfig {
            poll_interval_secs: 7,
            isolate_failures: true,
        };
        let engine = SchedulerEngine::from_config(engine.dispatcher, &cfg);
        assert_eq!(engine.poll_interval, Duration::from_secs(7));
    }
}
