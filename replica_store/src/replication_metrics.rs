//! Replication-coverage aggregations (spec §4.7 "Orphan-chunk counting", "Actual replication
//! level") computed over the persisted `replica` rows.
//!
//! Grounded on `replica/DatabaseServicesMySQL.cc`'s `workerContribution`/replication-level
//! reporting queries used by the replica-verification controller.

use crate::store::ReplicaStore;
use crate::Result;
use qserv_types::ChunkId;
use sqlx::Row;
use std::collections::{HashMap, HashSet};

/// One row of an "actual replication level" report: `num_chunks` chunks in the database have
/// exactly `level` replicas among the counted workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationLevelCount {
    /// The observed per-chunk replica count.
    pub level: usize,
    /// How many chunks have exactly that many replicas.
    pub num_chunks: usize,
}

async fn workers_by_chunk(
    store: &ReplicaStore,
    database: &str,
) -> Result<HashMap<ChunkId, HashSet<String>>> {
    let rows = sqlx::query("SELECT chunk, worker FROM replica WHERE database = ?")
        .bind(database)
        .fetch_all(store.pool())
        .await?;

    let mut by_chunk: HashMap<ChunkId, HashSet<String>> = HashMap::new();
    for row in rows {
        let chunk = ChunkId(row.try_get("chunk")?);
        if chunk.is_sentinel() {
            continue;
        }
        let worker: String = row.try_get("worker")?;
        by_chunk.entry(chunk).or_default().insert(worker);
    }
    Ok(by_chunk)
}

impl ReplicaStore {
    /// Count chunks that appear on exactly one worker of `unique_on` and on no worker outside
    /// it (spec §4.7 "Orphan-chunk counting"; spec §8 scenario 6). The sentinel chunk is always
    /// ignored.
    pub async fn num_orphan_chunks(
        &self,
        database: &str,
        unique_on: &HashSet<String>,
    ) -> Result<usize> {
        let by_chunk = workers_by_chunk(self, database).await?;
        let mut orphans = 0;
        for workers in by_chunk.values() {
            let in_set = workers.iter().filter(|w| unique_on.contains(*w)).count();
            let outside_set = workers.iter().any(|w| !unique_on.contains(*w));
            if in_set == 1 && !outside_set {
                orphans += 1;
            }
        }
        Ok(orphans)
    }

    /// Report, for each observed per-chunk replica count, how many chunks have exactly that
    /// many replicas, ignoring the sentinel chunk and any worker in `exclude_workers` (spec
    /// §4.7 "Actual replication level").
    pub async fn actual_replication_level(
        &self,
        database: &str,
        exclude_workers: &HashSet<String>,
    ) -> Result<Vec<ReplicationLevelCount>> {
        let by_chunk = workers_by_chunk(self, database).await?;
        let mut chunks_by_level: HashMap<usize, usize> = HashMap::new();
        for workers in by_chunk.values() {
            let level = workers.iter().filter(|w| !exclude_workers.contains(*w)).count();
            *chunks_by_level.entry(level).or_default() += 1;
        }
        let mut out: Vec<_> = chunks_by_level
            .into_iter()
            .map(|(level, num_chunks)| ReplicationLevelCount { level, num_chunks })
            .collect();
        out.sort_by_key(|c| c.level);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn orphan_definition_matches_scenario_6() {
        // (A,D,1),(B,D,1),(A,D,2),(C,D,3); unique_on = {A,B}; expect exactly chunk 2 orphan.
        let mut by_chunk: HashMap<ChunkId, HashSet<String>> = HashMap::new();
        by_chunk.insert(ChunkId(1), set(&["A", "B"]));
        by_chunk.insert(ChunkId(2), set(&["A"]));
        by_chunk.insert(ChunkId(3), set(&["C"]));

        let unique_on = set(&["A", "B"]);
        let mut orphans = 0;
        for workers in by_chunk.values() {
            let in_set = workers.iter().filter(|w| unique_on.contains(*w)).count();
            let outside_set = workers.iter().any(|w| !unique_on.contains(*w));
            if in_set == 1 && !outside_set {
                orphans += 1;
            }
        }
        assert_eq!(orphans, 1);
    }
}
