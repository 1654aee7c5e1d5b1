//! Observability for treestore
//!
//! - Structured logging (JSON lines)
//! - Query counters
//! - Typed lifecycle events
//!
//! Observability is read-only: nothing here influences query results.

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, QueryMetrics};

/// Log a lifecycle event at the event's own severity, unless that is below
/// `threshold`. Thresholds belong to the caller, so two stores configured
/// differently do not affect each other.
pub fn log_event(threshold: Severity, event: Event, fields: &[(&str, &str)]) {
    if event.severity() >= threshold {
        Logger::log(event.severity(), event.as_str(), fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_does_not_panic() {
        log_event(Severity::Trace, Event::TxnBegin, &[("txn", "t1")]);
        log_event(Severity::Fatal, Event::SelectComplete, &[]);
    }
}
