//! `cronlatch-scheduler`: recurrence-rule scheduling with exactly-once
//! claiming and no central daemon.
//!
//! # Overview
//!
//! Jobs live in a [`JobStore`] (SQLite or in-memory). Any caller may run a
//! [`Dispatcher`] pass at any time:
//!
//! 1. the [`DispatchWatermark`] (cached minimum `next_run`) gates the pass;
//! 2. due jobs are queried (`next_run < now`);
//! 3. each is claimed by a compare-and-set on `next_run` that also writes the
//!    next occurrence from [`compute_next_run`];
//! 4. the winner resolves the job's handler in the [`HandlerRegistry`] and
//!    runs it;
//! 5. the watermark is rebuilt.
//!
//! # Rules
//!
//! | Field   | Values                                 |
//! |---------|----------------------------------------|
//! | minutes | 0–59 or any                            |
//! | hours   | 0–23 or any                            |
//! | days    | day-of-week 0–6 (0 = Sunday) **or** day-of-month 1–31 |
//!
//! Text form: `"<minutes> <hours> <days>"`, e.g. `"0,30 9-17 dow:1-5"`.

pub mod claim;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handle;
pub mod handler;
pub mod rule;
pub mod schedule;
pub mod store;
pub mod types;
pub mod watermark;

pub use claim::{ClaimCoordinator, ClaimOutcome};
pub use dispatcher::{Dispatcher, FailurePolicy};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use handle::SchedulerHandle;
pub use handler::{HandlerError, HandlerRegistry, HandlerResult, JobHandler};
pub use rule::{DayConstraint, Field, RecurrenceRule};
pub use schedule::compute_next_run;
pub use store::{JobStore, MemoryStore, SqliteStore};
pub use types::{Job, JobContext, NewJob, PassReport, WATERMARK_NEVER};
pub use watermark::DispatchWatermark;
