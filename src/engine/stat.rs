//! Cumulative mutation counters

use serde::{Deserialize, Serialize};

use crate::storage::Transaction;

/// Totals over committed transactions only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub create: u64,
    pub update: u64,
    pub remove: u64,
    pub commit: u64,
}

impl Stat {
    /// Folds one committed transaction into the totals
    pub fn absorb(&mut self, txn: &Transaction) {
        self.create += txn.create;
        self.update += txn.update;
        self.remove += txn.remove;
        self.commit += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MutationKind;
    use uuid::Uuid;

    #[test]
    fn test_absorb() {
        let mut txn = Transaction::new(Uuid::new_v4());
        txn.record(MutationKind::Create, 2);
        txn.record(MutationKind::Remove, 1);

        let mut stat = Stat::default();
        stat.absorb(&txn);
        stat.absorb(&txn);

        assert_eq!(
            stat,
            Stat {
                create: 4,
                update: 0,
                remove: 2,
                commit: 2
            }
        );
    }
}
