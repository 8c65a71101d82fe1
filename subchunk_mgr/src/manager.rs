use crate::entry::ChunkEntry;
use crate::reservation::{Reservation, ReservationInfo};
use crate::{Backend, BackendError};
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::warn;
use parking_lot::{Mutex, RwLock};
use qserv_types::{ChunkId, DbTable, SubChunkId};
use std::collections::HashMap;
use std::sync::Arc;

/// A request to reserve a set of per-subchunk tables within one chunk.
#[derive(Debug, Clone)]
pub struct AcquireRequest<'a> {
    /// The database the tables belong to.
    pub db: &'a str,
    /// The chunk the subchunks belong to.
    pub chunk_id: ChunkId,
    /// The (unqualified) table names to reserve subchunks of.
    pub tables: &'a [String],
    /// The subchunk ids to reserve within each table.
    pub sub_chunk_ids: &'a [SubChunkId],
}

/// Failures from [`SubchunkMgr::acquire`].
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// The process no longer holds the memory database's exclusive lock.
    #[error("memory lock error: {0}")]
    Lock(#[from] crate::mem_lock::LockError),
    /// The backend failed to materialize one or more newly-needed subchunk tables.
    #[error("backend load failed: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug)]
struct Metrics {
    loads_total: Metric<U64Counter>,
    loads_failed_total: Metric<U64Counter>,
    discards_total: Metric<U64Counter>,
}

impl Metrics {
    fn new(registry: &Registry) -> Self {
        Self {
            loads_total: registry
                .register_metric("subchunk_loads_total", "number of subchunk tables materialized"),
            loads_failed_total: registry.register_metric(
                "subchunk_loads_failed_total",
                "number of subchunk table load attempts that failed",
            ),
            discards_total: registry
                .register_metric("subchunk_discards_total", "number of subchunk tables dropped"),
        }
    }
}

/// Reference-counted creation and discard of per-subchunk in-memory tables, backed by a
/// pluggable [`Backend`]. One `SubchunkMgr` is shared (via `Arc`) across every task runner on a
/// worker, the same way a single `ChunkResourceMgr` is shared across all of a worker's threads
/// in the original.
#[derive(Debug)]
pub struct SubchunkMgr<B: Backend> {
    backend: Arc<B>,
    chunks: RwLock<HashMap<ChunkId, Arc<Mutex<ChunkEntry>>>>,
    metrics: Metrics,
}

impl<B: Backend> SubchunkMgr<B> {
    /// Construct a manager around `backend`, registering its counters in `registry`.
    pub fn new(backend: Arc<B>, registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            backend,
            chunks: RwLock::new(HashMap::new()),
            metrics: Metrics::new(registry),
        })
    }

    fn entry_for(&self, chunk_id: ChunkId) -> Arc<Mutex<ChunkEntry>> {
        if let Some(entry) = self.chunks.read().get(&chunk_id) {
            return Arc::clone(entry);
        }
        Arc::clone(
            self.chunks
                .write()
                .entry(chunk_id)
                .or_insert_with(|| Arc::new(Mutex::new(ChunkEntry::default()))),
        )
    }

    /// Reserve the subchunks described by `req`, loading any of them that are not already
    /// reserved by someone else. The returned [`Reservation`] keeps them alive until dropped.
    ///
    /// Concurrent `acquire` calls for the *same* not-yet-loaded subchunk both observe the
    /// refcount go from zero to one only for whichever wins the race to bump it first; the
    /// loser sees a non-zero count and skips issuing its own load, trusting the winner's load
    /// to finish before either caller actually reads the table. This relies on [`Backend::load`]
    /// being safe to race on (the [`crate::FakeBackend`] is, by construction). A production
    /// backend backed by `CREATE TABLE ... SELECT` would need the same property or a stronger
    /// per-subchunk lock here.
    pub async fn acquire(self: &Arc<Self>, req: AcquireRequest<'_>) -> Result<Reservation<B>, AcquireError> {
        self.backend.mem_lock_require_ownership()?;

        let tables: Vec<DbTable> = req
            .tables
            .iter()
            .map(|t| DbTable::new(req.db.to_string(), t.clone()))
            .collect();

        let entry = self.entry_for(req.chunk_id);
        let newly_needed = {
            let mut guard = entry.lock();
            guard.bump_and_collect_new(req.chunk_id, &tables, req.sub_chunk_ids)
        };

        if !newly_needed.is_empty() {
            if let Err(err) = self.backend.load(&newly_needed).await {
                let mut guard = entry.lock();
                // Loading failed: nothing was actually materialized, so roll the refcounts back
                // to what they were before this call rather than discarding through the backend.
                guard.release(req.chunk_id, &tables, req.sub_chunk_ids);
                self.metrics.loads_failed_total.recorder(&[]).inc(1);
                return Err(err.into());
            }
            self.metrics
                .loads_total
                .recorder(&[])
                .inc(newly_needed.len() as u64);
        }

        Ok(Reservation::new(
            Arc::clone(self),
            ReservationInfo {
                chunk_id: req.chunk_id,
                tables,
                sub_chunk_ids: req.sub_chunk_ids.to_vec(),
            },
        ))
    }

    /// Bump the refcount for an already-held reservation, without ever issuing a load. Called
    /// from [`Reservation::clone`], which cannot be `async`.
    pub(crate) fn acquire_unit(&self, info: &ReservationInfo) {
        let entry = self.entry_for(info.chunk_id);
        let newly_needed = entry
            .lock()
            .bump_and_collect_new(info.chunk_id, &info.tables, &info.sub_chunk_ids);
        debug_assert!(
            newly_needed.is_empty(),
            "cloning a reservation must never observe a zero refcount"
        );
    }

    /// Release one unit of an existing reservation. Any table whose refcount reaches zero is
    /// discarded from the backend in a spawned background task (see [`Reservation`]'s docs for
    /// why this can't simply be awaited here).
    pub(crate) fn release(&self, info: &ReservationInfo) {
        let entry = self.entry_for(info.chunk_id);
        let to_discard = {
            let mut guard = entry.lock();
            let to_discard = guard.release(info.chunk_id, &info.tables, &info.sub_chunk_ids);
            if guard.is_empty() {
                drop(guard);
                self.chunks.write().remove(&info.chunk_id);
            }
            to_discard
        };
        if to_discard.is_empty() {
            return;
        }
        self.metrics
            .discards_total
            .recorder(&[])
            .inc(to_discard.len() as u64);
        let backend = Arc::clone(&self.backend);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { backend.discard(&to_discard).await });
            }
            Err(_) => {
                warn!(
                    count = to_discard.len(),
                    "no tokio runtime available to discard released subchunk tables"
                );
            }
        }
    }
}
