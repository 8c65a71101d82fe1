use qserv_types::{ChunkId, DbTable, ScTable, SubChunkId};
use std::collections::HashMap;

/// Per-chunk refcount bookkeeping: `table -> subchunk -> refcount`. Mirrors the original
/// `ChunkEntry`'s `TableMap`/`SubChunkMap` nesting, minus its synchronization (the manager
/// wraps one of these in a `parking_lot::Mutex` per chunk).
#[derive(Debug, Default)]
pub(crate) struct ChunkEntry {
    tables: HashMap<DbTable, HashMap<SubChunkId, i64>>,
}

impl ChunkEntry {
    /// Bump the refcount of every `(table, subchunk)` pair by one, creating entries at 0 first.
    /// Returns the pairs that were at 0 before this call — the ones the caller must actually
    /// load from the backend.
    pub(crate) fn bump_and_collect_new(
        &mut self,
        chunk_id: ChunkId,
        tables: &[DbTable],
        sub_chunk_ids: &[SubChunkId],
    ) -> Vec<ScTable> {
        let mut newly_needed = Vec::new();
        for table in tables {
            let sub_map = self.tables.entry(table.clone()).or_default();
            for &sub_chunk_id in sub_chunk_ids {
                let count = sub_map.entry(sub_chunk_id).or_insert(0);
                if *count == 0 {
                    newly_needed.push(ScTable {
                        chunk_id,
                        db_table: table.clone(),
                        sub_chunk_id,
                    });
                }
                *count += 1;
            }
        }
        newly_needed
    }

    /// Decrement the refcount of every `(table, subchunk)` pair by one. Returns the pairs whose
    /// refcount just reached zero — the ones the caller must discard from the backend.
    ///
    /// # Panics
    ///
    /// Panics if a pair's refcount would go negative: that means a reservation was released
    /// twice, which is a caller bug, not a recoverable condition.
    pub(crate) fn release(
        &mut self,
        chunk_id: ChunkId,
        tables: &[DbTable],
        sub_chunk_ids: &[SubChunkId],
    ) -> Vec<ScTable> {
        let mut to_discard = Vec::new();
        for table in tables {
            let Some(sub_map) = self.tables.get_mut(table) else {
                panic!("released a reservation for {table} with no tracked subchunks");
            };
            for &sub_chunk_id in sub_chunk_ids {
                let count = sub_map.get_mut(&sub_chunk_id).unwrap_or_else(|| {
                    panic!("released untracked subchunk {sub_chunk_id:?} of {table}")
                });
                assert!(
                    *count > 0,
                    "subchunk refcount underflow for {table}:{sub_chunk_id:?}"
                );
                *count -= 1;
                if *count == 0 {
                    sub_map.remove(&sub_chunk_id);
                    to_discard.push(ScTable {
                        chunk_id,
                        db_table: table.clone(),
                        sub_chunk_id,
                    });
                }
            }
            if sub_map.is_empty() {
                self.tables.remove(table);
            }
        }
        to_discard
    }

    /// True once every table this entry ever tracked has been released back to zero.
    pub(crate) fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_of_a_subchunk_is_reported_as_newly_needed() {
        let mut entry = ChunkEntry::default();
        let tables = vec![DbTable::new("db", "Object")];
        let new = entry.bump_and_collect_new(ChunkId(1), &tables, &[SubChunkId(10)]);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].sub_chunk_id, SubChunkId(10));
    }

    #[test]
    fn second_acquire_of_the_same_subchunk_is_not_newly_needed() {
        let mut entry = ChunkEntry::default();
        let tables = vec![DbTable::new("db", "Object")];
        entry.bump_and_collect_new(ChunkId(1), &tables, &[SubChunkId(10)]);
        let new = entry.bump_and_collect_new(ChunkId(1), &tables, &[SubChunkId(10)]);
        assert!(new.is_empty());
    }

    #[test]
    fn release_down_to_zero_is_reported_for_discard() {
        let mut entry = ChunkEntry::default();
        let tables = vec![DbTable::new("db", "Object")];
        entry.bump_and_collect_new(ChunkId(1), &tables, &[SubChunkId(10)]);
        entry.bump_and_collect_new(ChunkId(1), &tables, &[SubChunkId(10)]);
        let discard = entry.release(ChunkId(1), &tables, &[SubChunkId(10)]);
        assert!(discard.is_empty(), "refcount is 2, one release must not discard");
        let discard = entry.release(ChunkId(1), &tables, &[SubChunkId(10)]);
        assert_eq!(discard.len(), 1);
        assert!(entry.is_empty());
    }

    #[test]
    #[should_panic(expected = "refcount underflow")]
    fn releasing_past_zero_panics() {
        let mut entry = ChunkEntry::default();
        let tables = vec![DbTable::new("db", "Object")];
        entry.bump_and_collect_new(ChunkId(1), &tables, &[SubChunkId(10)]);
        entry.release(ChunkId(1), &tables, &[SubChunkId(10)]);
        entry.release(ChunkId(1), &tables, &[SubChunkId(10)]);
    }
}
