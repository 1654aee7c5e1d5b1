//! Transaction records
//!
//! A transaction owns the ordered list of row keys it dirtied, so commit and
//! rollback touch exactly the dirty set.

use std::collections::HashSet;
use std::time::Instant;

use uuid::Uuid;

/// Transaction identity
pub type TxnId = Uuid;

/// Direct address of a row node: entity, then id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub entity: String,
    pub id: String,
}

impl RowKey {
    pub fn new(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// Which counter a mutation bumps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Remove,
}

/// Per-transaction bookkeeping
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    pub create: u64,
    pub update: u64,
    pub remove: u64,
    dirty: Vec<RowKey>,
    dirty_set: HashSet<RowKey>,
    started_at: Instant,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            create: 0,
            update: 0,
            remove: 0,
            dirty: Vec::new(),
            dirty_set: HashSet::new(),
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Appends `key` to the dirty log unless it is already there.
    /// Returns true if the key was newly added.
    pub fn register(&mut self, key: RowKey) -> bool {
        if self.dirty_set.contains(&key) {
            return false;
        }
        self.dirty_set.insert(key.clone());
        self.dirty.push(key);
        true
    }

    pub fn record(&mut self, kind: MutationKind, rows: u64) {
        match kind {
            MutationKind::Create => self.create += rows,
            MutationKind::Update => self.update += rows,
            MutationKind::Remove => self.remove += rows,
        }
    }

    /// Dirty keys in the order they were first touched
    pub fn dirty(&self) -> &[RowKey] {
        &self.dirty
    }

    /// Consumes the record, yielding the dirty keys
    pub fn into_dirty(self) -> Vec<RowKey> {
        self.dirty
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_keeps_first_touch_order_without_duplicates() {
        let mut txn = Transaction::new(Uuid::new_v4());
        assert!(txn.register(RowKey::new("user", "b")));
        assert!(txn.register(RowKey::new("user", "a")));
        assert!(!txn.register(RowKey::new("user", "b")));

        assert_eq!(
            txn.dirty(),
            &[RowKey::new("user", "b"), RowKey::new("user", "a")]
        );
    }

    #[test]
    fn test_record_counters() {
        let mut txn = Transaction::new(Uuid::new_v4());
        txn.record(MutationKind::Create, 2);
        txn.record(MutationKind::Update, 1);
        txn.record(MutationKind::Remove, 3);
        assert_eq!((txn.create, txn.update, txn.remove), (2, 1, 3));
    }
}
