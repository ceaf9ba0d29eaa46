use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::types::JobContext;

/// Failure reported by a job handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// The work behind a job.
///
/// Handlers run synchronously on the dispatching thread. The claim only
/// guarantees exclusive *start* of an instant; a slow handler may overlap
/// with the next instant's run elsewhere unless it serialises itself.
pub trait JobHandler: Send + Sync {
    fn execute(&self, ctx: &JobContext) -> HandlerResult;
}

impl<F> JobHandler for F
where
    F: Fn(&JobContext) -> HandlerResult + Send + Sync,
{
    fn execute(&self, ctx: &JobContext) -> HandlerResult {
        self(ctx)
    }
}

/// Maps the handler names stored on jobs to statically registered handlers.
///
/// Shared across dispatchers as `Arc<HandlerRegistry>`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, returning any handler it replaced.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Option<Arc<dyn JobHandler>> {
        let name = name.into();
        debug!(handler = %name, "job handler registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, handler)
    }

    /// Register a closure as a handler.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F) -> Option<Arc<dyn JobHandler>>
    where
        F: Fn(&JobContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(name, Arc::new(f))
    }

    /// Remove a handler. Jobs naming it become unresolvable.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some();
        if removed {
            debug!(handler = name, "job handler unregistered");
        }
        removed
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> JobContext {
        JobContext {
            job_id: "j".to_string(),
            name: "j".to_string(),
            scheduled_for: 0,
            claimed_at: Utc::now(),
            next_run: 60,
        }
    }

    #[test]
    fn closures_are_handlers() {
        let registry = HandlerRegistry::new();
        registry.register_fn("ok", |_| Ok(()));
        registry.register_fn("fails", |c| {
            Err(HandlerError::new(format!("boom in {}", c.job_id)))
        });

        assert!(registry.resolve("ok").unwrap().execute(&ctx()).is_ok());
        let err = registry.resolve("fails").unwrap().execute(&ctx()).unwrap_err();
        assert_eq!(err.to_string(), "boom in j");
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn register_replaces_and_unregister_removes() {
        let registry = HandlerRegistry::new();
        assert!(registry.register_fn("a", |_| Ok(())).is_none());
        assert!(registry.register_fn("a", |_| Ok(())).is_some());
        registry.register_fn("b", |_| Ok(()));
        assert_eq!(registry.names(), vec!["a", "b"]);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.names(), vec!["b"]);
    }
}
