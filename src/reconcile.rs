// ABOUTME: Pure diff engine computing the update/insert/delete partition for one entity
// ABOUTME: Compares the freshly fetched key set against the keys already persisted

use std::collections::HashSet;

use crate::normalize::NormalizedRow;

/// The three disjoint partitions computed for one entity in one run.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub update: Vec<NormalizedRow>,
    pub insert: Vec<NormalizedRow>,
    pub delete: Vec<i64>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.insert.is_empty() && self.delete.is_empty()
    }
}

/// Partition freshly fetched rows against the persisted key set.
///
/// Rows whose key is already persisted become updates and the rest become
/// inserts, so together they cover exactly the remote key set. Persisted keys
/// absent from the fetch are deleted. No ordering guarantee is made; this does
/// no I/O.
pub fn plan(remote_rows: Vec<NormalizedRow>, persisted: &HashSet<i64>) -> SyncPlan {
    let remote_keys: HashSet<i64> = remote_rows.iter().map(|row| row.key).collect();

    let mut update = Vec::new();
    let mut insert = Vec::new();
    for row in remote_rows {
        if persisted.contains(&row.key) {
            update.push(row);
        } else {
            insert.push(row);
        }
    }

    let delete: Vec<i64> = persisted
        .iter()
        .copied()
        .filter(|key| !remote_keys.contains(key))
        .collect();

    SyncPlan { update, insert, delete }
}
