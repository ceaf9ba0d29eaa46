use std::sync::Arc;

use chrono::DateTime;
use cronlatch_scheduler::{HandlerRegistry, HandlerResult, JobContext, JobHandler};
use tracing::info;

pub const LOG_HANDLER: &str = "log";

/// Records each firing in the log and does nothing else.
pub struct LogHandler;

impl JobHandler for LogHandler {
    fn execute(&self, ctx: &JobContext) -> HandlerResult {
        info!(
            job_id = %ctx.job_id,
            name = %ctx.name,
            scheduled_for = %format_ts(ctx.scheduled_for),
            next_run = %format_ts(ctx.next_run),
            "job fired"
        );
        Ok(())
    }
}

fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Registry holding every handler this binary ships with.
pub fn builtin_registry() -> Arc<HandlerRegistry> {
    let registry = HandlerRegistry::new();
    registry.register(LOG_HANDLER, Arc::new(LogHandler));
    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn builtin_registry_resolves_log() {
        let registry = builtin_registry();
        assert_eq!(registry.names(), vec![LOG_HANDLER]);

        let ctx = JobContext {
            job_id: "j1".to_string(),
            name: "heartbeat".to_string(),
            scheduled_for: 1_600_000_000,
            claimed_at: Utc::now(),
            next_run: 1_600_000_060,
        };
        assert!(registry.resolve(LOG_HANDLER).unwrap().execute(&ctx).is_ok());
    }

    #[test]
    fn format_ts_falls_back_to_raw_seconds() {
        assert_eq!(format_ts(0), "1970-01-01T00:00:00+00:00");
        assert_eq!(format_ts(i64::MAX), i64::MAX.to_string());
    }
}
