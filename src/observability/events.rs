//! Observable events emitted by the store
//!
//! Events are explicit and typed; the logger only ever sees their names.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Configuration loaded
    ConfigLoaded,
    /// Schema loaded and checked
    SchemaLoaded,
    /// Transaction started
    TxnBegin,
    /// Transaction committed
    TxnCommit,
    /// Transaction rolled back
    TxnRollback,
    /// A writer touched a row dirtied by another transaction
    RowConflict,
    /// Abjoint select finished
    SelectComplete,
    /// Abjoint update finished
    UpdateComplete,
    /// Sync batch replayed
    SyncComplete,
}

impl Event {
    /// Returns the event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::SchemaLoaded => "SCHEMA_LOADED",
            Event::TxnBegin => "TXN_BEGIN",
            Event::TxnCommit => "TXN_COMMIT",
            Event::TxnRollback => "TXN_ROLLBACK",
            Event::RowConflict => "ROW_CONFLICT",
            Event::SelectComplete => "SELECT_COMPLETE",
            Event::UpdateComplete => "UPDATE_COMPLETE",
            Event::SyncComplete => "SYNC_COMPLETE",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::SelectComplete | Event::UpdateComplete => Severity::Trace,
            Event::RowConflict => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
