//! A read-only view of the store as one transaction sees it
//!
//! Every row is materialised through `RowNode::construct_row` at the moment
//! it is needed; nothing is cached across calls.

use std::collections::HashSet;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::errors::QueryResult;
use super::filter::CompiledFilter;
use super::node_dict::NodeDict;
use super::projection::form_result;
use super::selection::{SelectOption, Selection};
use super::value::value_key;
use crate::observability::{log_event, Event, QueryMetrics, Severity};
use crate::schema::{foreign_key_column, Relation, Schema, ENTITY_ATTRIBUTE, ENTITY_ID_COLUMN};
use crate::storage::{Row, RowStore, TxnId};

/// A many-to-one pointer from a row to a row of another entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pointer {
    /// `entity` names the target, `entityId` holds its id
    Polymorphic { target: String },
    /// `column` holds the id of a `target` row
    ForeignKey { target: String, column: String },
}

impl Pointer {
    /// `None` for plain columns and one-to-many relations.
    pub(crate) fn from_relation(attribute: &str, relation: Relation) -> Option<Self> {
        match relation {
            Relation::Polymorphic { target } => Some(Pointer::Polymorphic { target }),
            Relation::ForeignKey { target } => Some(Pointer::ForeignKey {
                target,
                column: foreign_key_column(attribute),
            }),
            Relation::Column | Relation::ToMany { .. } => None,
        }
    }

    pub(crate) fn target(&self) -> &str {
        match self {
            Pointer::Polymorphic { target } | Pointer::ForeignKey { target, .. } => target,
        }
    }
}

/// Where a pointer leads for a given row
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    /// The pointer columns are absent
    Unset,
    /// A polymorphic pointer aimed at a different entity
    Elsewhere,
    /// The pointed-at row is not visible
    Missing,
    Found(Row),
}

/// Store, schema and caller transaction, bundled for query evaluation.
#[derive(Clone, Copy)]
pub struct ReadView<'a> {
    pub(crate) store: &'a RowStore,
    pub(crate) schema: &'a Schema,
    pub(crate) txn: Option<TxnId>,
    pub(crate) metrics: &'a QueryMetrics,
    pub(crate) eager_subqueries: bool,
    pub(crate) log_severity: Severity,
}

impl<'a> ReadView<'a> {
    pub fn new(
        store: &'a RowStore,
        schema: &'a Schema,
        txn: Option<TxnId>,
        metrics: &'a QueryMetrics,
        eager_subqueries: bool,
    ) -> Self {
        Self {
            store,
            schema,
            txn,
            metrics,
            eager_subqueries,
            log_severity: Severity::default(),
        }
    }

    /// Minimum severity of the events this view logs
    pub fn with_log_severity(mut self, severity: Severity) -> Self {
        self.log_severity = severity;
        self
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// The row `entity.id` as this transaction sees it
    pub fn visible(&self, entity: &str, id: &str) -> Option<Row> {
        self.store.visible(entity, id, self.txn)
    }

    /// Every row of `entity` visible to this transaction, in id order
    pub fn rows(&self, entity: &str) -> Vec<Row> {
        self.store
            .scan(entity)
            .filter_map(|(_, node)| node.construct_row(self.txn))
            .collect()
    }

    pub(crate) fn follow(&self, pointer: &Pointer, row: &Row) -> Target {
        let id = match pointer {
            Pointer::Polymorphic { target } => {
                match row.get(ENTITY_ATTRIBUTE).and_then(Value::as_str) {
                    None => return Target::Unset,
                    Some(entity) if entity != target => return Target::Elsewhere,
                    Some(_) => row.get(ENTITY_ID_COLUMN),
                }
            }
            Pointer::ForeignKey { column, .. } => row.get(column),
        };
        match id.and_then(Value::as_str) {
            None => Target::Unset,
            Some(id) => match self.visible(pointer.target(), id) {
                Some(found) => Target::Found(found),
                None => Target::Missing,
            },
        }
    }

    /// Scans `entity`, filters, then projects, sorts and paginates.
    pub fn select(
        self,
        entity: &'a str,
        selection: &'a Selection,
        option: &'a SelectOption,
    ) -> BoxFuture<'a, QueryResult<Vec<Row>>> {
        async move {
            self.schema.entity(entity)?;
            let filter = selection
                .filter
                .as_ref()
                .map(|f| CompiledFilter::compile(self.schema, entity, f, option.obscure))
                .transpose()?;

            let mut matched = Vec::new();
            let mut scanned = 0u64;
            for row in self.rows(entity) {
                scanned += 1;
                if let Some(filter) = &filter {
                    let mut dict = option.node_dict.clone();
                    let outcome = filter.evaluate(self, &row, &mut dict).await?;
                    if !outcome.finish(&dict)? {
                        continue;
                    }
                }
                matched.push(row);
            }
            self.metrics.add_rows_scanned(scanned);

            let matched_count = matched.len();
            let rows = form_result(
                self,
                entity,
                matched,
                selection,
                &option.node_dict,
                option.obscure,
            )
            .await?;
            self.metrics.increment_selects();

            if self.log_severity == Severity::Trace {
                log_event(
                    self.log_severity,
                    Event::SelectComplete,
                    &[
                        ("entity", entity),
                        ("scanned", &scanned.to_string()),
                        ("matched", &matched_count.to_string()),
                        ("returned", &rows.len().to_string()),
                    ],
                );
            }
            Ok(rows)
        }
        .boxed()
    }

    /// Values of `attribute` over the rows of `entity` passing `filter`,
    /// keyed for set membership.
    pub(crate) async fn collect_values(
        self,
        entity: &str,
        attribute: &str,
        filter: Option<&CompiledFilter>,
        seed: &NodeDict,
    ) -> QueryResult<HashSet<String>> {
        self.metrics.increment_subqueries();
        let mut values = HashSet::new();
        for row in self.rows(entity) {
            if let Some(filter) = filter {
                let mut dict = seed.clone();
                let outcome = filter.evaluate(self, &row, &mut dict).await?;
                if !outcome.finish(&dict)? {
                    continue;
                }
            }
            if let Some(value) = row.get(attribute) {
                values.insert(value_key(value));
            }
        }
        Ok(values)
    }
}
