//! Versioned row nodes
//!
//! A node holds the last committed snapshot of a row plus at most one
//! pending change, owned by exactly one transaction.

use serde_json::{Map, Value};

use super::txn::TxnId;

/// A row: attribute name to JSON value
pub type Row = Map<String, Value>;

/// A pending, uncommitted change to a row
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange {
    /// Attributes to merge over `current` on commit
    Write(Row),
    /// The row is deleted on commit
    Remove,
    /// The row was removed and created again; replaces `current` on commit
    Replace(Row),
}

/// Storage unit for one row
#[derive(Debug, Clone, PartialEq)]
pub struct RowNode {
    current: Option<Row>,
    next: Option<PendingChange>,
    txn: Option<TxnId>,
}

impl RowNode {
    /// A row created by `txn` and not committed yet
    pub fn created(data: Row, txn: TxnId) -> Self {
        Self {
            current: None,
            next: Some(PendingChange::Write(data)),
            txn: Some(txn),
        }
    }

    /// A clean, committed row
    pub fn committed(data: Row) -> Self {
        Self {
            current: Some(data),
            next: None,
            txn: None,
        }
    }

    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingChange> {
        self.next.as_ref()
    }

    /// Transaction holding the pending change, if any
    pub fn owner(&self) -> Option<TxnId> {
        self.txn
    }

    pub fn is_dirty(&self) -> bool {
        self.txn.is_some()
    }

    /// The row as seen by `txn`.
    ///
    /// Other transactions' pending changes are invisible; the owner sees its
    /// own writes, and its own pending delete hides the row.
    pub fn construct_row(&self, txn: Option<TxnId>) -> Option<Row> {
        let own = txn.is_some() && self.txn == txn;
        match (&self.next, own) {
            (Some(PendingChange::Remove), true) => None,
            (Some(PendingChange::Write(patch)), true) => {
                Some(merge(self.current.as_ref(), patch))
            }
            (Some(PendingChange::Replace(data)), true) => Some(data.clone()),
            _ => self.current.clone(),
        }
    }

    /// Takes ownership for `txn`. Returns false if another transaction
    /// already owns the node.
    pub fn adopt(&mut self, txn: TxnId) -> bool {
        match self.txn {
            Some(owner) => owner == txn,
            None => {
                self.txn = Some(txn);
                true
            }
        }
    }

    /// Records a pending change. The caller must own the node.
    pub fn set_pending(&mut self, change: PendingChange) {
        debug_assert!(self.txn.is_some());
        self.next = Some(change);
    }

    /// Applies the pending change. Returns false when the row must be
    /// physically removed from the store.
    pub fn commit(&mut self) -> bool {
        self.txn = None;
        match self.next.take() {
            Some(PendingChange::Remove) => false,
            Some(PendingChange::Write(patch)) => {
                self.current = Some(merge(self.current.as_ref(), &patch));
                true
            }
            Some(PendingChange::Replace(data)) => {
                self.current = Some(data);
                true
            }
            None => self.current.is_some(),
        }
    }

    /// Drops the pending change. Returns false when the row never existed
    /// outside its creating transaction and must be removed from the store.
    pub fn rollback(&mut self) -> bool {
        self.txn = None;
        self.next = None;
        self.current.is_some()
    }
}

/// Shallow merge: attributes of `patch` override those of `base`.
pub fn merge(base: Option<&Row>, patch: &Row) -> Row {
    let mut merged = base.cloned().unwrap_or_default();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_overrides_and_keeps() {
        let base = row(json!({"id": "1", "a": 1, "b": 2}));
        let merged = merge(Some(&base), &row(json!({"b": 3, "c": null})));
        assert_eq!(Value::Object(merged), json!({"id": "1", "a": 1, "b": 3, "c": null}));
    }

    #[test]
    fn test_created_row_visible_only_to_creator() {
        let txn = Uuid::new_v4();
        let node = RowNode::created(row(json!({"id": "1"})), txn);

        assert_eq!(node.construct_row(Some(txn)), Some(row(json!({"id": "1"}))));
        assert_eq!(node.construct_row(Some(Uuid::new_v4())), None);
        assert_eq!(node.construct_row(None), None);
    }

    #[test]
    fn test_update_is_read_your_writes() {
        let txn = Uuid::new_v4();
        let mut node = RowNode::committed(row(json!({"id": "1", "a": 1})));
        assert!(node.adopt(txn));
        node.set_pending(PendingChange::Write(row(json!({"id": "1", "a": 2}))));

        assert_eq!(node.construct_row(Some(txn)).unwrap()["a"], json!(2));
        assert_eq!(node.construct_row(None).unwrap()["a"], json!(1));
    }

    #[test]
    fn test_pending_remove_hides_row_from_owner() {
        let txn = Uuid::new_v4();
        let mut node = RowNode::committed(row(json!({"id": "1"})));
        node.adopt(txn);
        node.set_pending(PendingChange::Remove);

        assert_eq!(node.construct_row(Some(txn)), None);
        assert!(node.construct_row(Some(Uuid::new_v4())).is_some());
    }

    #[test]
    fn test_adopt_rejects_foreign_owner() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut node = RowNode::committed(row(json!({"id": "1"})));
        assert!(node.adopt(a));
        assert!(node.adopt(a));
        assert!(!node.adopt(b));
        assert_eq!(node.owner(), Some(a));
    }

    #[test]
    fn test_commit_merges_and_cleans() {
        let txn = Uuid::new_v4();
        let mut node = RowNode::committed(row(json!({"id": "1", "a": 1, "b": 1})));
        node.adopt(txn);
        node.set_pending(PendingChange::Write(row(json!({"a": 5}))));

        assert!(node.commit());
        assert!(!node.is_dirty());
        assert_eq!(node.current(), Some(&row(json!({"id": "1", "a": 5, "b": 1}))));
    }

    #[test]
    fn test_commit_remove_requests_deletion() {
        let txn = Uuid::new_v4();
        let mut node = RowNode::committed(row(json!({"id": "1"})));
        node.adopt(txn);
        node.set_pending(PendingChange::Remove);
        assert!(!node.commit());
    }

    #[test]
    fn test_rollback_restores_current() {
        let txn = Uuid::new_v4();
        let original = row(json!({"id": "1", "a": 1}));
        let mut node = RowNode::committed(original.clone());
        node.adopt(txn);
        node.set_pending(PendingChange::Write(row(json!({"a": 9}))));

        assert!(node.rollback());
        assert_eq!(node, RowNode::committed(original));
    }

    #[test]
    fn test_replace_drops_removed_attributes() {
        let txn = Uuid::new_v4();
        let mut node = RowNode::committed(row(json!({"id": "1", "a": 1, "b": 1})));
        node.adopt(txn);
        node.set_pending(PendingChange::Remove);
        node.set_pending(PendingChange::Replace(row(json!({"id": "1", "a": 2}))));

        assert_eq!(node.construct_row(Some(txn)), Some(row(json!({"id": "1", "a": 2}))));
        assert_eq!(node.construct_row(None).unwrap()["b"], json!(1));
        assert!(node.commit());
        assert_eq!(node.current(), Some(&row(json!({"id": "1", "a": 2}))));
    }

    #[test]
    fn test_rollback_of_create_requests_deletion() {
        let mut node = RowNode::created(row(json!({"id": "1"})), Uuid::new_v4());
        assert!(!node.rollback());
    }
}
