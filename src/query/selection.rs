//! Selection AST and select options

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{QueryError, QueryResult};
use super::node_dict::NodeDict;
use crate::config::StoreConfig;

/// A single-entity read: projection, filter, sort and pagination.
///
/// ```json
/// { "data": { "id": 1, "name": 1 },
///   "filter": { "age": { "$gt": 18 } },
///   "sorter": [ { "$attr": { "name": 1 }, "$direction": "asc" } ],
///   "indexFrom": 0, "count": 10 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_from: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl Selection {
    /// A selection projecting `data`. Non-object projections are ignored.
    pub fn new(data: Value) -> Self {
        Self {
            data: match data {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            ..Self::default()
        }
    }

    pub fn from_value(value: &Value) -> QueryResult<Self> {
        Selection::deserialize(value)
            .map_err(|e| QueryError::invalid(format!("malformed selection: {}", e)))
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sorter(mut self, sorter: Value) -> Self {
        self.sorter = Some(sorter);
        self
    }

    pub fn with_page(mut self, index_from: usize, count: usize) -> Self {
        self.index_from = Some(index_from);
        self.count = Some(count);
        self
    }
}

/// Per-select options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOption {
    /// A missing value cannot disprove a predicate.
    pub obscure: bool,
    /// Bindings visible to every row's filter and projection.
    pub node_dict: NodeDict,
}

impl SelectOption {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            obscure: config.default_obscure,
            node_dict: NodeDict::new(),
        }
    }

    pub fn obscure(mut self, obscure: bool) -> Self {
        self.obscure = obscure;
        self
    }

    pub fn with_node_dict(mut self, node_dict: NodeDict) -> Self {
        self.node_dict = node_dict;
        self
    }
}
