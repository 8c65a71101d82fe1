use async_trait::async_trait;
use parking_lot::Mutex;
use qserv_types::ScTable;
use std::collections::HashSet;
use std::fmt;

/// The column every subchunk table is partitioned on.
pub const SUB_CHUNK_COLUMN: &str = "subChunkId";

/// Build the `CREATE TABLE ... SELECT ... WHERE subChunkId = ?` script for one subchunk table.
pub fn create_subchunk_script(sc: &ScTable, spatial_column: &str) -> String {
    format!(
        "CREATE TABLE {db}.{table}_{chunk}_{subchunk} ENGINE=MEMORY AS \
         SELECT * /* spatial col: {spatial} */ FROM {db}.{table}_{chunk} WHERE {sub_col} = {subchunk}",
        db = sc.db_table.db,
        table = sc.db_table.table,
        chunk = sc.chunk_id.0,
        subchunk = sc.sub_chunk_id.0,
        sub_col = SUB_CHUNK_COLUMN,
        spatial = spatial_column,
    )
}

/// Build the cleanup script dropping one subchunk table.
pub fn cleanup_subchunk_script(sc: &ScTable) -> String {
    format!(
        "DROP TABLE IF EXISTS {db}.{table}_{chunk}_{subchunk}",
        db = sc.db_table.db,
        table = sc.db_table.table,
        chunk = sc.chunk_id.0,
        subchunk = sc.sub_chunk_id.0,
    )
}

/// Errors from a backend load, surfaced to the acquiring caller so it can unwind the refcounts
/// it had already bumped for this request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The bulk `CREATE TABLE ... SELECT` sequence failed partway through.
    #[error("subchunk load failed: {0}")]
    LoadFailed(String),
}

/// The in-memory-table backend collaborator. The manager calls this only after re-verifying
/// process ownership of the memory lock.
#[async_trait]
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// Confirm this process still owns the memory database's exclusive lock before touching
    /// any table. Cheap and synchronous: a simple flag check, not a round trip.
    fn mem_lock_require_ownership(&self) -> Result<(), crate::mem_lock::LockError>;

    /// Materialize every table in `tables` via `CREATE TABLE ... SELECT`.
    async fn load(&self, tables: &[ScTable]) -> Result<(), BackendError>;

    /// Drop every table in `tables`. Best-effort: failures are logged, not surfaced, since the
    /// caller releasing a reservation has nothing sensible to do with a discard error.
    async fn discard(&self, tables: &[ScTable]);
}

/// Test double for [`Backend`]: records `db:chunk:table:subchunk` strings in a set instead of
/// touching a real database. Still honors the process-wide memory lock, since several tests
/// exercise rejection when it isn't held.
#[derive(Debug, Default)]
pub struct FakeBackend {
    keys: Mutex<HashSet<String>>,
}

impl FakeBackend {
    /// A fresh fake with no tables loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// The exact key format used internally, exposed for tests that want to assert on state.
    pub fn make_fake_key(sc: &ScTable) -> String {
        format!(
            "{}:{}:{}:{}",
            sc.db_table.db, sc.chunk_id.0, sc.db_table.table, sc.sub_chunk_id.0
        )
    }

    /// Whether `sc` is currently recorded as loaded.
    pub fn contains(&self, sc: &ScTable) -> bool {
        self.keys.lock().contains(&Self::make_fake_key(sc))
    }

    /// Number of tables currently recorded as loaded.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Whether no tables are currently recorded as loaded.
    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn mem_lock_require_ownership(&self) -> Result<(), crate::mem_lock::LockError> {
        crate::mem_lock::require_ownership()
    }

    async fn load(&self, tables: &[ScTable]) -> Result<(), BackendError> {
        let mut keys = self.keys.lock();
        for sc in tables {
            keys.insert(Self::make_fake_key(sc));
        }
        Ok(())
    }

    async fn discard(&self, tables: &[ScTable]) {
        let mut keys = self.keys.lock();
        for sc in tables {
            keys.remove(&Self::make_fake_key(sc));
        }
    }
}
