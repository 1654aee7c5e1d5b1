//! Row storage and transaction bookkeeping
//!
//! # Lifecycle of a row
//!
//! absent → created (`current = None`, `next = Write`) → committed →
//! updated (`next = Write(merged)`) → committed → removed (`next = Remove`)
//! → committed (physically deleted).
//!
//! Rollback at any dirty state restores the pre-transaction `current`;
//! rolling back a create deletes the node.

mod row;
mod rows;
mod txn;

pub use row::{merge, PendingChange, Row, RowNode};
pub use rows::RowStore;
pub use txn::{MutationKind, RowKey, Transaction, TxnId};
