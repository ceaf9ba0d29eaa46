use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use cronlatch_core::SchedulerConfig;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::claim::{ClaimCoordinator, ClaimOutcome};
use crate::error::{Result, SchedulerError};
use crate::handler::{HandlerError, HandlerRegistry, JobHandler};
use crate::store::JobStore;
use crate::types::{JobContext, PassReport};
use crate::watermark::DispatchWatermark;

/// What a pass does when a handler returns an error or panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log, count, and carry on with the remaining due jobs.
    #[default]
    Isolate,
    /// Abort the pass with the failure. The watermark is not rebuilt.
    FailFast,
}

impl From<&SchedulerConfig> for FailurePolicy {
    fn from(cfg: &SchedulerConfig) -> Self {
        if cfg.isolate_failures {
            FailurePolicy::Isolate
        } else {
            FailurePolicy::FailFast
        }
    }
}

/// Runs due passes: watermark gate → due query → claim → invoke → rebuild.
///
/// Any number of dispatchers (threads or processes sharing a store) may run
/// passes at the same time; the claim keeps each due instant single-shot.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    claims: ClaimCoordinator,
    watermark: DispatchWatermark,
    handlers: Arc<HandlerRegistry>,
    policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            claims: ClaimCoordinator::new(Arc::clone(&store)),
            watermark: DispatchWatermark::new(Arc::clone(&store)),
            store,
            handlers,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn watermark(&self) -> &DispatchWatermark {
        &self.watermark
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Run every job due at `now` that this caller manages to claim.
    ///
    /// Returns immediately with `gated = true` when `now` is before the
    /// watermark. Storage errors propagate; handler failures follow the
    /// configured [`FailurePolicy`].
    #[instrument(skip_all, fields(now = %now))]
    pub fn run_due_pass(&self, now: DateTime<Utc>) -> Result<PassReport> {
        let now_ts = now.timestamp();
        let mark = self.watermark.get()?;
        if now_ts < mark {
            trace!(watermark = mark, "nothing can be due yet");
            return Ok(PassReport {
                gated: true,
                watermark: mark,
                ..PassReport::default()
            });
        }

        let due = self.store.due_jobs(now_ts)?;
        let mut report = PassReport {
            due: due.len(),
            ..PassReport::default()
        };

        for job in &due {
            let next_run = match self.claims.try_claim(job, now)? {
                ClaimOutcome::Claimed { next_run } => next_run,
                ClaimOutcome::Lost => {
                    report.lost += 1;
                    continue;
                }
            };
            report.claimed += 1;

            // The claim already advanced next_run, so an unresolvable job
            // is simply picked up again at its next occurrence.
            let Some(handler) = self.handlers.resolve(&job.handler) else {
                warn!(job_id = %job.id, handler = %job.handler, "no handler registered, skipping");
                report.unresolved += 1;
                continue;
            };

            let ctx = JobContext {
                job_id: job.id.clone(),
                name: job.name.clone(),
                scheduled_for: job.next_run,
                claimed_at: now,
                next_run,
            };
            info!(job_id = %job.id, name = %job.name, next_run, "executing job");

            let started = Instant::now();
            let outcome = invoke(handler.as_ref(), &ctx);
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => debug!(job_id = %job.id, duration_ms, "job completed"),
                Err(failure) => {
                    report.failed += 1;
                    error!(job_id = %job.id, duration_ms, "{failure}");
                    if self.policy == FailurePolicy::FailFast {
                        return Err(failure.into_error(&job.id));
                    }
                }
            }
        }

        report.watermark = self.watermark.rebuild()?;
        Ok(report)
    }
}

enum Failure {
    Returned(HandlerError),
    Panicked(String),
}

impl Failure {
    fn into_error(self, job_id: &str) -> SchedulerError {
        match self {
            Failure::Returned(e) => SchedulerError::JobFailed {
                job_id: job_id.to_string(),
                reason: e.to_string(),
            },
            Failure::Panicked(message) => SchedulerError::JobPanicked {
                job_id: job_id.to_string(),
                message,
            },
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Returned(e) => write!(f, "job failed: {e}"),
            Failure::Panicked(msg) => write!(f, "job panicked: {msg}"),
        }
    }
}

fn invoke(handler: &dyn JobHandler, ctx: &JobContext) -> std::result::Result<(), Failure> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.execute(ctx))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Failure::Returned(e)),
        Err(payload) => Err(Failure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
