//! The store facade: abjoint select/update, transactions, stats, sync

use serde_json::{json, Value};
use uuid::Uuid;

use super::context::Context;
use super::errors::{StoreError, StoreResult};
use super::operation::{Action, OpRecord, OperateOption, Operation};
use super::stat::Stat;
use crate::config::StoreConfig;
use crate::observability::{log_event, Event, MetricsSnapshot, QueryMetrics, Severity};
use crate::query::{ReadView, SelectOption, Selection};
use crate::schema::Schema;
use crate::storage::{
    merge, MutationKind, PendingChange, Row, RowKey, RowNode, RowStore, TxnId,
};

/// An in-memory, schema-aware row store
///
/// Selects borrow the store shared; mutations and transaction boundaries
/// borrow it exclusively.
#[derive(Debug)]
pub struct TreeStore {
    store: RowStore,
    schema: Schema,
    config: StoreConfig,
    stat: Stat,
    metrics: QueryMetrics,
}

impl TreeStore {
    /// Creates an empty store. Events below `config.log_severity` are not
    /// logged by this store.
    pub fn new(schema: Schema, config: StoreConfig) -> Self {
        Self {
            store: RowStore::new(),
            schema,
            config,
            stat: Stat::default(),
            metrics: QueryMetrics::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Select options carrying the configured defaults
    pub fn select_option(&self) -> SelectOption {
        SelectOption::from_config(&self.config)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn active_transactions(&self) -> usize {
        self.store.active_transactions()
    }

    fn view(&self, txn: Option<TxnId>) -> ReadView<'_> {
        ReadView::new(
            &self.store,
            &self.schema,
            txn,
            &self.metrics,
            self.config.eager_subqueries,
        )
        .with_log_severity(self.config.log_severity)
    }

    /// Reads one entity without following one-to-many fan-out beyond what
    /// the projection asks for.
    pub async fn select_abjoint_row(
        &self,
        entity: &str,
        selection: &Selection,
        ctx: &Context,
        option: &SelectOption,
    ) -> StoreResult<Vec<Row>> {
        Ok(self.view(ctx.txn()).select(entity, selection, option).await?)
    }

    /// Applies `operation` to `entity` inside the context's transaction.
    /// Returns the number of rows affected.
    pub async fn update_abjoint_row(
        &mut self,
        entity: &str,
        operation: &Operation,
        ctx: &Context,
        option: &OperateOption,
    ) -> StoreResult<usize> {
        let txn = self.active_txn(ctx)?;
        self.schema.entity(entity)?;

        let affected = match &operation.action {
            Action::Create => self.create_rows(entity, &operation.data, txn, option.allow_exists)?,
            Action::Remove => {
                let ids = self.matching_ids(entity, operation.filter.as_ref(), txn).await?;
                self.remove_rows(entity, &ids, txn)?
            }
            Action::Update | Action::Custom(_) => {
                let patch = match &operation.data {
                    Value::Object(patch) => patch.clone(),
                    _ => {
                        return Err(StoreError::invalid_operation(format!(
                            "{} on {} requires an object patch",
                            operation.action.name(),
                            entity
                        )))
                    }
                };
                let ids = self.matching_ids(entity, operation.filter.as_ref(), txn).await?;
                self.update_rows(entity, &ids, &patch, txn)?
            }
        };

        if self.config.log_severity == Severity::Trace {
            self.log(
                Event::UpdateComplete,
                &[
                    ("entity", entity),
                    ("action", operation.action.name()),
                    ("rows", &affected.to_string()),
                    ("txn", &txn.to_string()),
                ],
            );
        }
        Ok(affected)
    }

    /// Opens a transaction
    pub fn begin(&mut self) -> TxnId {
        let id = Uuid::new_v4();
        self.store.begin(id);
        self.log(Event::TxnBegin, &[("txn", &id.to_string())]);
        id
    }

    /// Applies every pending change of `txn`
    pub fn commit(&mut self, txn: TxnId) -> StoreResult<()> {
        let record = self
            .store
            .commit(txn)
            .ok_or(StoreError::UnknownTransaction(txn))?;
        self.stat.absorb(&record);
        self.log(
            Event::TxnCommit,
            &[
                ("txn", &txn.to_string()),
                ("rows", &record.dirty().len().to_string()),
                ("create", &record.create.to_string()),
                ("update", &record.update.to_string()),
                ("remove", &record.remove.to_string()),
                ("duration_ms", &record.elapsed_ms().to_string()),
            ],
        );
        Ok(())
    }

    /// Discards every pending change of `txn`
    pub fn rollback(&mut self, txn: TxnId) -> StoreResult<()> {
        let record = self
            .store
            .rollback(txn)
            .ok_or(StoreError::UnknownTransaction(txn))?;
        self.log(
            Event::TxnRollback,
            &[
                ("txn", &txn.to_string()),
                ("rows", &record.dirty().len().to_string()),
            ],
        );
        Ok(())
    }

    /// Cumulative counters over committed transactions
    pub fn get_stat(&self) -> Stat {
        self.stat
    }

    /// Replays `records` into the store with upsert semantics: creates and
    /// snapshot rows update an existing row instead of failing.
    pub async fn sync(&mut self, records: &[OpRecord], ctx: &Context) -> StoreResult<()> {
        let upsert = OperateOption { allow_exists: true };
        let mut rows = 0usize;

        for record in records {
            rows += match record {
                OpRecord::Create { entity, data } => {
                    self.update_abjoint_row(entity, &Operation::create(data.clone()), ctx, &upsert)
                        .await?
                }
                OpRecord::Update {
                    entity,
                    data,
                    filter,
                } => {
                    let operation = Operation {
                                    action: Action::Update,
                        data: data.clone(),
                        filter: filter.clone(),
                    };
                    self.update_abjoint_row(entity, &operation, ctx, &upsert).await?
                }
                OpRecord::Remove { entity, filter } => {
                    let operation = Operation {
                                    action: Action::Remove,
                        data: Value::Null,
                        filter: filter.clone(),
                    };
                    self.update_abjoint_row(entity, &operation, ctx, &upsert).await?
                }
                OpRecord::Select { data } => {
                    let mut count = 0;
                    for (entity, snapshot) in data {
                        for (id, row) in snapshot {
                            let mut row = row.clone();
                            row.entry("id").or_insert_with(|| Value::from(id.as_str()));
                            count += self
                                .update_abjoint_row(
                                    entity,
                                    &Operation::create(Value::Object(row)),
                                    ctx,
                                    &upsert,
                                )
                                .await?;
                        }
                    }
                    count
                }
            };
        }

        self.log(
            Event::SyncComplete,
            &[
                ("records", &records.len().to_string()),
                ("rows", &rows.to_string()),
            ],
        );
        Ok(())
    }

    fn active_txn(&self, ctx: &Context) -> StoreResult<TxnId> {
        let txn = ctx.txn().ok_or(StoreError::NoActiveTransaction)?;
        if self.store.transaction(txn).is_none() {
            return Err(StoreError::UnknownTransaction(txn));
        }
        Ok(txn)
    }

    /// Ids of the rows `filter` matches, as `txn` sees them
    async fn matching_ids(
        &self,
        entity: &str,
        filter: Option<&Value>,
        txn: TxnId,
    ) -> StoreResult<Vec<String>> {
        let mut selection = Selection::new(json!({"id": 1}));
        selection.filter = filter.cloned();
        let rows = self
            .view(Some(txn))
            .select(entity, &selection, &SelectOption::default())
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    fn create_rows(
        &mut self,
        entity: &str,
        data: &Value,
        txn: TxnId,
        allow_exists: bool,
    ) -> StoreResult<usize> {
        let rows: Vec<&Row> = match data {
            Value::Object(row) => vec![row],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object().ok_or_else(|| {
                        StoreError::invalid_operation(format!("create on {} expects rows", entity))
                    })
                })
                .collect::<StoreResult<_>>()?,
            _ => {
                return Err(StoreError::invalid_operation(format!(
                    "create on {} expects a row or an array of rows",
                    entity
                )))
            }
        };

        for row in &rows {
            self.create_row(entity, row, txn, allow_exists)?;
        }
        Ok(rows.len())
    }

    fn create_row(&mut self, entity: &str, row: &Row, txn: TxnId, allow_exists: bool) -> StoreResult<()> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::invalid_operation(format!("create on {} requires a string id", entity)))?
            .to_string();

        if let Some(node) = self.store.node(entity, &id) {
            let congruent = |row: Row| StoreError::CongruentRowExists {
                entity: entity.to_string(),
                id: id.clone(),
                row,
            };
            return match node.construct_row(Some(txn)) {
                Some(_) if allow_exists => self.update_rows(entity, &[id.clone()], row, txn).map(|_| ()),
                Some(existing) => Err(congruent(existing)),
                // created by someone else, or removed by us
                None => match node.owner() {
                    Some(owner) if owner != txn => Err(self.locked(entity, &id, owner)),
                    _ if allow_exists => {
                        self.recreate_row(entity, &id, row, txn);
                        Ok(())
                    }
                    _ => Err(congruent(node.current().cloned().unwrap_or_default())),
                },
            };
        }

        let key = RowKey::new(entity, id);
        self.store.insert(key.clone(), RowNode::created(row.clone(), txn));
        self.register(txn, key, MutationKind::Create, 1);
        Ok(())
    }

    /// Creates `row` over this transaction's own pending remove.
    fn recreate_row(&mut self, entity: &str, id: &str, row: &Row, txn: TxnId) {
        let key = RowKey::new(entity, id);
        if let Some(node) = self.store.node_mut(&key) {
            node.adopt(txn);
            node.set_pending(PendingChange::Replace(row.clone()));
            self.register(txn, key, MutationKind::Create, 1);
        }
    }

    fn update_rows(&mut self, entity: &str, ids: &[String], patch: &Row, txn: TxnId) -> StoreResult<usize> {
        if let Some(new_id) = patch.get("id") {
            if ids.iter().any(|id| new_id.as_str() != Some(id.as_str())) {
                return Err(StoreError::invalid_operation(format!(
                    "update on {} cannot change a row id",
                    entity
                )));
            }
        }
        self.check_ownership(entity, ids, txn)?;

        for id in ids {
            let key = RowKey::new(entity, id.as_str());
            let Some(node) = self.store.node_mut(&key) else {
                continue;
            };
            node.adopt(txn);
            let next = match node.pending() {
                Some(PendingChange::Write(pending)) => PendingChange::Write(merge(Some(pending), patch)),
                Some(PendingChange::Replace(data)) => PendingChange::Replace(merge(Some(data), patch)),
                _ => PendingChange::Write(patch.clone()),
            };
            node.set_pending(next);
            self.register(txn, key, MutationKind::Update, 1);
        }
        Ok(ids.len())
    }

    fn remove_rows(&mut self, entity: &str, ids: &[String], txn: TxnId) -> StoreResult<usize> {
        self.check_ownership(entity, ids, txn)?;

        for id in ids {
            let key = RowKey::new(entity, id.as_str());
            let Some(node) = self.store.node_mut(&key) else {
                continue;
            };
            node.adopt(txn);
            node.set_pending(PendingChange::Remove);
            self.register(txn, key, MutationKind::Remove, 1);
        }
        Ok(ids.len())
    }

    /// Fails before anything is touched if another transaction owns any of
    /// the rows.
    fn check_ownership(&self, entity: &str, ids: &[String], txn: TxnId) -> StoreResult<()> {
        for id in ids {
            match self.store.node(entity, id).and_then(|node| node.owner()) {
                Some(owner) if owner != txn => return Err(self.locked(entity, id, owner)),
                _ => {}
            }
        }
        Ok(())
    }

    fn log(&self, event: Event, fields: &[(&str, &str)]) {
        log_event(self.config.log_severity, event, fields);
    }

    fn locked(&self, entity: &str, id: &str, owner: TxnId) -> StoreError {
        self.log(
            Event::RowConflict,
            &[("entity", entity), ("id", id), ("owner", &owner.to_string())],
        );
        StoreError::RowLocked {
            entity: entity.to_string(),
            id: id.to_string(),
            owner,
        }
    }

    fn register(&mut self, txn: TxnId, key: RowKey, kind: MutationKind, rows: u64) {
        if let Some(record) = self.store.transaction_mut(txn) {
            record.register(key);
            record.record(kind, rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDef, EntityDef};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn store() -> TreeStore {
        let schema = Schema::new().with_entity(
            "user",
            EntityDef::new()
                .with_attribute("name", AttributeDef::string())
                .with_attribute("age", AttributeDef::int()),
        );
        TreeStore::new(schema, StoreConfig::default())
    }

    async fn names(store: &TreeStore, ctx: &Context) -> Vec<Value> {
        let selection = Selection::new(json!({"name": 1}));
        store
            .select_abjoint_row("user", &selection, ctx, &SelectOption::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.get("name").cloned().unwrap_or(Value::Null))
            .collect()
    }

    #[tokio::test]
    async fn test_create_requires_transaction() {
        let mut store = store();
        let err = store
            .update_abjoint_row(
                "user",
                &Operation::create(json!({"id": "u1"})),
                &Context::detached(),
                &OperateOption::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NoActiveTransaction);

        let ghost = Uuid::new_v4();
        let err = store
            .update_abjoint_row(
                "user",
                &Operation::create(json!({"id": "u1"})),
                &Context::new(ghost),
                &OperateOption::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UnknownTransaction(ghost));
    }

    #[tokio::test]
    async fn test_create_then_commit() {
        let mut store = store();
        let txn = store.begin();
        let ctx = Context::new(txn);

        let created = store
            .update_abjoint_row(
                "user",
                &Operation::create(json!([{"id": "u1", "name": "ann"}, {"id": "u2", "name": "bob"}])),
                &ctx,
                &OperateOption::default(),
            )
            .await
            .unwrap();
        assert_eq!(created, 2);
        assert_eq!(names(&store, &ctx).await, vec![json!("ann"), json!("bob")]);
        assert!(names(&store, &Context::detached()).await.is_empty());

        store.commit(txn).unwrap();
        assert_eq!(names(&store, &Context::detached()).await.len(), 2);
        assert_eq!(store.get_stat().create, 2);
        assert_eq!(store.get_stat().commit, 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_congruent() {
        let mut store = store();
        let txn = store.begin();
        let ctx = Context::new(txn);
        let op = Operation::create(json!({"id": "u1", "name": "ann"}));
        store.update_abjoint_row("user", &op, &ctx, &OperateOption::default()).await.unwrap();

        let err = store
            .update_abjoint_row("user", &op, &ctx, &OperateOption::default())
            .await
            .unwrap_err();
        assert_eq!(err.existing_row(), Some(&row(json!({"id": "u1", "name": "ann"}))));

        let upsert = Operation::create(json!({"id": "u1", "name": "amy"}));
        store
            .update_abjoint_row("user", &upsert, &ctx, &OperateOption { allow_exists: true })
            .await
            .unwrap();
        assert_eq!(names(&store, &ctx).await, vec![json!("amy")]);
    }

    #[tokio::test]
    async fn test_update_cannot_change_id() {
        let mut store = store();
        let txn = store.begin();
        let ctx = Context::new(txn);
        store
            .update_abjoint_row("user", &Operation::create(json!({"id": "u1"})), &ctx, &OperateOption::default())
            .await
            .unwrap();

        let err = store
            .update_abjoint_row(
                "user",
                &Operation::update(json!({"id": "u2"}), json!({"id": "u1"})),
                &ctx,
                &OperateOption::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_INVALID_OPERATION");
    }

    #[tokio::test]
    async fn test_custom_action_updates() {
        let mut store = store();
        let txn = store.begin();
        let ctx = Context::new(txn);
        store
            .update_abjoint_row("user", &Operation::create(json!({"id": "u1", "age": 1})), &ctx, &OperateOption::default())
            .await
            .unwrap();

        let affected = store
            .update_abjoint_row(
                "user",
                &Operation::custom("birthday", json!({"age": 2}), json!({"id": "u1"})),
                &ctx,
                &OperateOption::default(),
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
        store.commit(txn).unwrap();
        assert_eq!(store.get_stat().update, 1);
    }

    #[test]
    fn test_unknown_transaction_boundaries() {
        let mut store = store();
        let ghost = Uuid::new_v4();
        assert_eq!(store.commit(ghost), Err(StoreError::UnknownTransaction(ghost)));
        assert_eq!(store.rollback(ghost), Err(StoreError::UnknownTransaction(ghost)));
    }

    #[test]
    fn test_log_severity_is_per_store() {
        let quiet = store();
        let verbose = TreeStore::new(quiet.schema().clone(), StoreConfig::verbose());

        assert_eq!(verbose.view(None).log_severity, Severity::Trace);
        assert_eq!(quiet.view(None).log_severity, Severity::Warn);
    }
}
