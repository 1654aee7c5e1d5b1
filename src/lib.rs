//! treestore - a schema-aware, transactional, in-memory row store
//!
//! Rows are JSON objects grouped by entity. Reads use a JSON query
//! language (projection, filter, sorter, pagination) with cross-row
//! expressions; writes are scoped to single-owner transactions.

pub mod config;
pub mod engine;
pub mod observability;
pub mod query;
pub mod schema;
pub mod storage;

pub use config::{ConfigError, StoreConfig};
pub use engine::{
    Action, Context, ErrorKind, OpRecord, OperateOption, Operation, Stat, StoreError,
    StoreResult, TreeStore,
};
pub use query::{NodeDict, QueryError, SelectOption, Selection};
pub use schema::{judge_relation, Relation, Schema, SchemaError, SchemaLoader};
pub use storage::{Row, TxnId};
