//! Abjoint operations
//!
//! [`TreeStore`] composes row storage, the transaction log and the query
//! pipeline into single-entity reads and writes:
//! - `select_abjoint_row`: scan, filter, form result
//! - `update_abjoint_row`: create, or resolve targets by filter then
//!   update/remove them inside the caller's transaction
//! - `begin` / `commit` / `rollback`, `get_stat`, `sync`

mod context;
mod errors;
mod operation;
mod stat;
mod tree_store;

pub use context::Context;
pub use errors::{ErrorKind, StoreError, StoreResult};
pub use operation::{Action, OpRecord, OperateOption, Operation};
pub use stat::Stat;
pub use tree_store::TreeStore;
