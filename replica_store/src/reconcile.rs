//! Replica-collection reconciliation (spec §4.7 "Replica save (collection)"): given a worker, a
//! database, and a freshly reported list of replicas, compute the three-way split against what
//! is already persisted and apply exactly the deletes/inserts/replacements needed.
//!
//! Grounded on `replica/DatabaseServicesMySQL.cc`'s `saveReplicaInfoCollection`, built on top of
//! [`nested_map`]'s composite-key set algebra the same way the original builds it on
//! `SemanticMaps.h`.

use crate::store::ReplicaStore;
use crate::Result;
use nested_map::{diff2_3, intersect3, Map};
use observability_deps::tracing::debug;
use qserv_types::{ChunkId, Replica};

/// What [`ReplicaStore::save_replicas_collection`] did, broken down the way spec §4.7's six-step
/// algorithm names its three outcome buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Entries present only in the old state: deleted.
    pub deleted: usize,
    /// Entries present only in the new state: inserted.
    pub inserted: usize,
    /// Entries present in both, but whose content differed: delete-then-inserted.
    pub replaced: usize,
    /// Entries present in both with identical content: left untouched.
    pub unchanged: usize,
}

type CompositeMap = Map<String, Map<String, Map<ChunkId, Replica>>>;

fn build_composite(replicas: &[Replica]) -> CompositeMap {
    let mut m = Map::new();
    for r in replicas {
        m.at(r.worker.clone())
            .at(r.database.clone())
            .insert(r.chunk, r.clone());
    }
    m
}

/// Flatten a 3-level composite map into `(worker, database, chunk)` triples, in the ascending
/// key order `nested_map::Map` iterates in.
fn flatten_keys(m: &CompositeMap) -> Vec<(String, String, ChunkId)> {
    let mut out = Vec::new();
    for w in m.keys() {
        let by_db = m.get(&w);
        for db in by_db.keys() {
            let by_chunk = by_db.get(&db);
            for chunk in by_chunk.keys() {
                out.push((w.clone(), db.clone(), chunk));
            }
        }
    }
    out
}

impl ReplicaStore {
    /// Reconcile the worker's freshly reported `new_list` against persisted state, following
    /// spec §4.7's six steps exactly.
    pub async fn save_replicas_collection(
        &self,
        worker: &str,
        database: &str,
        new_list: &[Replica],
    ) -> Result<ReconcileOutcome> {
        // 1. filter the new list to the (worker, db) context.
        let filtered: Vec<Replica> = new_list
            .iter()
            .filter(|r| r.worker == worker && r.database == database)
            .cloned()
            .collect();

        // 2. read the current old list from the store.
        let old_list = self.replicas_for_worker_database(worker, database).await?;

        let new_map = build_composite(&filtered);
        let old_map = build_composite(&old_list);

        // 3. compute inBoth / inNewOnly / inOldOnly over the composite key (worker, db, chunk).
        let both_keys = flatten_keys(&intersect3(&new_map, &old_map));
        let (new_only, old_only) = diff2_3(&new_map, &old_map);
        let new_only_keys = flatten_keys(&new_only);
        let old_only_keys = flatten_keys(&old_only);

        let mut outcome = ReconcileOutcome::default();

        // 4. delete every entry in inOldOnly.
        for (w, db, chunk) in &old_only_keys {
            self.delete_replica_row(w, db, *chunk).await?;
            outcome.deleted += 1;
        }

        // 5. insert every entry in inNewOnly.
        for (w, db, chunk) in &new_only_keys {
            let replica = new_map.get(w).get(db).get(chunk);
            self.save_replica(replica).await?;
            outcome.inserted += 1;
        }

        // 6. for every entry in inBoth, deep-compare (including files) and delete-then-insert
        // if different.
        for (w, db, chunk) in &both_keys {
            let new_replica = new_map.get(w).get(db).get(chunk);
            let old_replica = old_map.get(w).get(db).get(chunk);
            if new_replica.content_eq(old_replica) {
                outcome.unchanged += 1;
                continue;
            }
            let save_outcome = self.save_replica(new_replica).await?;
            debug!(
                worker = %w,
                database = %db,
                chunk = %chunk,
                ?save_outcome,
                "replica content changed, replaced"
            );
            outcome.replaced += 1;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iox_time::Time;

    fn replica(worker: &str, db: &str, chunk: i64) -> Replica {
        Replica {
            worker: worker.into(),
            database: db.into(),
            chunk: ChunkId(chunk),
            verify_time: Time::from_timestamp(0),
            files: vec![],
        }
    }

    #[test]
    fn flatten_keys_is_key_ordered() {
        let m = build_composite(&[replica("A", "a", 2), replica("A", "a", 1)]);
        let keys = flatten_keys(&m);
        assert_eq!(
            keys,
            vec![
                ("A".to_string(), "a".to_string(), ChunkId(1)),
                ("A".to_string(), "a".to_string(), ChunkId(2)),
            ]
        );
    }

    #[test]
    fn three_way_split_matches_scenario_3() {
        // spec §8 scenario 3: old {(A,a,1),(A,a,2)}, new {(A,a,1),(A,b,3)}.
        let old = build_composite(&[replica("A", "a", 1), replica("A", "a", 2)]);
        let new = build_composite(&[replica("A", "a", 1), replica("A", "b", 3)]);

        let both = flatten_keys(&intersect3(&new, &old));
        assert_eq!(both, vec![("A".to_string(), "a".to_string(), ChunkId(1))]);

        let (new_only, old_only) = diff2_3(&new, &old);
        assert_eq!(
            flatten_keys(&new_only),
            vec![("A".to_string(), "b".to_string(), ChunkId(3))]
        );
        assert_eq!(
            flatten_keys(&old_only),
            vec![("A".to_string(), "a".to_string(), ChunkId(2))]
        );
    }
}
