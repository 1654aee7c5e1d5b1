//! Operation context
//!
//! Carries the caller's transaction through selects and mutations.

use crate::storage::TxnId;

/// Context for one store call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    txn: Option<TxnId>,
}

impl Context {
    /// Context inside transaction `txn`
    pub fn new(txn: TxnId) -> Self {
        Self { txn: Some(txn) }
    }

    /// Context outside any transaction: sees committed rows only
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn txn(&self) -> Option<TxnId> {
        self.txn
    }
}
