//! The row store: `entity → id → RowNode`, plus the open transactions.
//!
//! Rows never point at each other; cross-entity navigation is a fresh
//! lookup by id. Ids iterate in ascending order, which fixes scan order.

use std::collections::{BTreeMap, HashMap};

use super::row::{Row, RowNode};
use super::txn::{RowKey, Transaction, TxnId};

#[derive(Debug, Default)]
pub struct RowStore {
    tables: HashMap<String, BTreeMap<String, RowNode>>,
    transactions: HashMap<TxnId, Transaction>,
}

impl RowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, entity: &str, id: &str) -> Option<&RowNode> {
        self.tables.get(entity)?.get(id)
    }

    pub fn node_mut(&mut self, key: &RowKey) -> Option<&mut RowNode> {
        self.tables.get_mut(&key.entity)?.get_mut(&key.id)
    }

    /// The row `entity.id` as seen by `txn`
    pub fn visible(&self, entity: &str, id: &str, txn: Option<TxnId>) -> Option<Row> {
        self.node(entity, id)?.construct_row(txn)
    }

    /// All nodes of `entity` in id order
    pub fn scan<'a>(&'a self, entity: &str) -> impl Iterator<Item = (&'a String, &'a RowNode)> + 'a {
        self.tables.get(entity).into_iter().flat_map(|table| table.iter())
    }

    pub fn insert(&mut self, key: RowKey, node: RowNode) {
        self.tables.entry(key.entity).or_default().insert(key.id, node);
    }

    fn remove(&mut self, key: &RowKey) {
        if let Some(table) = self.tables.get_mut(&key.entity) {
            table.remove(&key.id);
            if table.is_empty() {
                self.tables.remove(&key.entity);
            }
        }
    }

    /// Number of nodes stored for `entity`, dirty ones included
    pub fn len(&self, entity: &str) -> usize {
        self.tables.get(entity).map_or(0, BTreeMap::len)
    }

    pub fn begin(&mut self, id: TxnId) {
        self.transactions.insert(id, Transaction::new(id));
    }

    pub fn transaction(&self, id: TxnId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    pub fn transaction_mut(&mut self, id: TxnId) -> Option<&mut Transaction> {
        self.transactions.get_mut(&id)
    }

    pub fn active_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Applies every pending change of `id` and closes the transaction.
    /// Returns `None` if the transaction is unknown.
    pub fn commit(&mut self, id: TxnId) -> Option<Transaction> {
        let txn = self.transactions.remove(&id)?;
        for key in txn.dirty() {
            let keep = match self.node_mut(key) {
                Some(node) => node.commit(),
                None => continue,
            };
            if !keep {
                self.remove(key);
            }
        }
        Some(txn)
    }

    /// Discards every pending change of `id` and closes the transaction.
    /// Returns `None` if the transaction is unknown.
    pub fn rollback(&mut self, id: TxnId) -> Option<Transaction> {
        let txn = self.transactions.remove(&id)?;
        for key in txn.dirty() {
            let keep = match self.node_mut(key) {
                Some(node) => node.rollback(),
                None => continue,
            };
            if !keep {
                self.remove(key);
            }
        }
        Some(txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PendingChange;
    use serde_json::json;
    use uuid::Uuid;

    fn row(id: &str) -> Row {
        json!({"id": id, "v": 1}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_scan_in_id_order() {
        let mut store = RowStore::new();
        for id in ["c", "a", "b"] {
            store.insert(RowKey::new("e", id), RowNode::committed(row(id)));
        }
        let ids: Vec<_> = store.scan("e").map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.scan("missing").count(), 0);
    }

    #[test]
    fn test_commit_applies_dirty_set() {
        let mut store = RowStore::new();
        let txn = Uuid::new_v4();
        store.begin(txn);

        let created = RowKey::new("e", "new");
        store.insert(created.clone(), RowNode::created(row("new"), txn));
        store.transaction_mut(txn).unwrap().register(created);

        let removed = RowKey::new("e", "old");
        store.insert(removed.clone(), RowNode::committed(row("old")));
        let node = store.node_mut(&removed).unwrap();
        node.adopt(txn);
        node.set_pending(PendingChange::Remove);
        store.transaction_mut(txn).unwrap().register(removed);

        assert!(store.commit(txn).is_some());
        assert_eq!(store.visible("e", "new", None), Some(row("new")));
        assert!(store.node("e", "old").is_none());
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn test_rollback_drops_created_rows() {
        let mut store = RowStore::new();
        let txn = Uuid::new_v4();
        store.begin(txn);
        let key = RowKey::new("e", "new");
        store.insert(key.clone(), RowNode::created(row("new"), txn));
        store.transaction_mut(txn).unwrap().register(key);

        store.rollback(txn).unwrap();
        assert_eq!(store.len("e"), 0);
    }

    #[test]
    fn test_unknown_transaction() {
        let mut store = RowStore::new();
        assert!(store.commit(Uuid::new_v4()).is_none());
        assert!(store.rollback(Uuid::new_v4()).is_none());
    }
}
