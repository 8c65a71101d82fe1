use std::fmt;

/// A qualified reference to a table: `(database, table)`.
///
/// Total-ordered by lexicographic comparison of the pair, which is what makes it usable both as
/// a `BTreeMap` key (for the nested map's composite-key algorithms) and as the cache identity
/// `subchunk_mgr` keys its materializations on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbTable {
    /// The database name.
    pub db: String,
    /// The table name.
    pub table: String,
}

impl DbTable {
    /// Construct a new qualified table reference.
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for DbTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.table)
    }
}

/// A chunk identifier. Non-negative by convention; the sentinel value
/// [`crate::CHUNK_SENTINEL`] denotes the pseudo-chunk used for metadata rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub i64);

impl ChunkId {
    /// True if this is the reserved metadata pseudo-chunk, which is always excluded from
    /// replication counting.
    pub fn is_sentinel(&self) -> bool {
        self.0 == crate::CHUNK_SENTINEL
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subchunk identifier, scoped to a particular chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubChunkId(pub i32);

/// Identifies one materialized per-subchunk temporary table: `(chunkId, dbTable, subChunkId)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScTable {
    /// The chunk this subchunk table belongs to.
    pub chunk_id: ChunkId,
    /// The source table being sub-partitioned.
    pub db_table: DbTable,
    /// The subchunk identifier within the chunk.
    pub sub_chunk_id: SubChunkId,
}

impl ScTable {
    /// Construct a new subchunk table descriptor.
    pub fn new(chunk_id: ChunkId, db_table: DbTable, sub_chunk_id: SubChunkId) -> Self {
        Self {
            chunk_id,
            db_table,
            sub_chunk_id,
        }
    }
}

impl fmt::Display for ScTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.db_table, self.chunk_id, self.sub_chunk_id.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_table_orders_lexicographically() {
        let a = DbTable::new("a_db", "z_table");
        let b = DbTable::new("b_db", "a_table");
        assert!(a < b); // db compared first
    }

    #[test]
    fn sentinel_chunk_is_recognized() {
        assert!(ChunkId(crate::CHUNK_SENTINEL).is_sentinel());
        assert!(!ChunkId(42).is_sentinel());
    }
}
