use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::RecurrenceRule;

/// Watermark value meaning "no schedulable job exists".
pub const WATERMARK_NEVER: i64 = i64::MAX;

/// A persisted periodic job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Stable primary key.
    pub id: String,
    /// Human-readable label, used in logs only.
    pub name: String,
    /// Name the job's handler is registered under in the [`crate::HandlerRegistry`].
    pub handler: String,
    /// Owning group (e.g. a plugin). `None` means the job is always group-enabled.
    pub group: Option<String>,
    pub rule: RecurrenceRule,
    /// Inactive jobs are never selected as due.
    pub active: bool,
    /// Derived from the owning group's enabled flag; not stored on the job.
    pub group_enabled: bool,
    /// Unix seconds. A job is due once this is strictly less than now.
    pub next_run: i64,
    /// Unix seconds of the most recent successful claim.
    pub last_run: Option<i64>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl Job {
    /// Active and not hidden by a disabled group.
    pub fn is_schedulable(&self) -> bool {
        self.active && self.group_enabled
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.is_schedulable() && self.next_run < now
    }
}

/// Input for registering a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Explicit id; a UUID is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub handler: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub rule: RecurrenceRule,
    /// First due instant in Unix seconds; defaults to the registration time.
    #[serde(default)]
    pub first_run: Option<i64>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, handler: impl Into<String>, rule: RecurrenceRule) -> Self {
        Self {
            id: None,
            name: name.into(),
            handler: handler.into(),
            group: None,
            rule,
            first_run: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn first_run_at(mut self, ts: i64) -> Self {
        self.first_run = Some(ts);
        self
    }
}

/// What a handler is told about the instant it was claimed for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub job_id: String,
    pub name: String,
    /// The `next_run` value that was due (Unix seconds).
    pub scheduled_for: i64,
    /// When the claim happened.
    pub claimed_at: DateTime<Utc>,
    /// The `next_run` value written by the claim (Unix seconds).
    pub next_run: i64,
}

/// Outcome counters of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// The watermark said nothing could be due; no query was made.
    pub gated: bool,
    /// Jobs returned by the due query.
    pub due: usize,
    /// Claims won (whether or not the handler then succeeded).
    pub claimed: usize,
    /// Claims lost to a concurrent dispatcher.
    pub lost: usize,
    /// Claimed jobs whose handler name is not registered.
    pub unresolved: usize,
    /// Claimed jobs whose handler returned an error or panicked.
    pub failed: usize,
    /// Watermark after the pass.
    pub watermark: i64,
}

impl PassReport {
    /// Handlers that ran to completion without error.
    pub fn succeeded(&self) -> usize {
        self.claimed - self.unresolved - self.failed
    }
}
