//! Recording policies.

use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{BoxFuture, Next, Policy, RelayResult, RequestContext, Response};

/// A shared, ordered log of pipeline events.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    /// Returns a snapshot of the events.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Removes every event.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// A policy that logs `<name>-before` and `<name>-after` around `next`.
///
/// `-after` is logged on success and on error.
#[derive(Debug, Clone)]
pub struct RecordingPolicy {
    name: &'static str,
    log: EventLog,
}

impl RecordingPolicy {
    /// Creates a recording policy writing to `log`.
    #[must_use]
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

impl Policy for RecordingPolicy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        Box::pin(async move {
            self.log.push(format!("{}-before", self.name));
            let result = next.run(ctx).await;
            self.log.push(format!("{}-after", self.name));
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_shared_between_clones() {
        let log = EventLog::new();
        let clone = log.clone();
        clone.push("a");
        assert_eq!(log.events(), vec!["a"]);
        log.clear();
        assert!(clone.events().is_empty());
    }
}
