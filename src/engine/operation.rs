//! Mutation and replay records
//!
//! Every write enters the store as an [`Operation`]; `sync` replays
//! [`OpRecord`]s produced elsewhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::Row;

/// What a mutation does. Any name other than create/update/remove is a
/// custom action and behaves as an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Create,
    Update,
    Remove,
    Custom(String),
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Remove => "remove",
            Action::Custom(name) => name,
        }
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        match name.as_str() {
            "create" => Action::Create,
            "update" => Action::Update,
            "remove" => Action::Remove,
            _ => Action::Custom(name),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.name().to_string()
    }
}

/// A single-entity mutation
///
/// `data` is the row (or array of rows) to create, or the patch to merge;
/// `filter` selects the rows an update or remove applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub action: Action,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl Operation {
    pub fn create(data: Value) -> Self {
        Self {
            action: Action::Create,
            data,
            filter: None,
        }
    }

    pub fn update(data: Value, filter: Value) -> Self {
        Self {
            action: Action::Update,
            data,
            filter: Some(filter),
        }
    }

    pub fn remove(filter: Value) -> Self {
        Self {
            action: Action::Remove,
            data: Value::Null,
            filter: Some(filter),
        }
    }

    pub fn custom(name: impl Into<String>, data: Value, filter: Value) -> Self {
        Self {
            action: Action::from(name.into()),
            data,
            filter: Some(filter),
        }
    }
}

/// Options for a mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperateOption {
    /// A create hitting an existing id updates that row instead of failing.
    pub allow_exists: bool,
}

/// One entry of a replayed operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OpRecord {
    Create {
        entity: String,
        /// A row or an array of rows
        data: Value,
    },
    Update {
        entity: String,
        data: Value,
        #[serde(default)]
        filter: Option<Value>,
    },
    Remove {
        entity: String,
        #[serde(default)]
        filter: Option<Value>,
    },
    /// Snapshot of rows as seen by the source: entity → id → row
    Select {
        data: BTreeMap<String, BTreeMap<String, Row>>,
    },
}
