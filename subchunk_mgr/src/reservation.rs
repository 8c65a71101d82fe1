use crate::Backend;
use crate::SubchunkMgr;
use qserv_types::{ChunkId, DbTable, SubChunkId};
use std::sync::Arc;

/// The identity of a reservation, independent of its manager: which chunk, which qualified
/// tables, and which subchunks within them.
#[derive(Debug, Clone)]
pub(crate) struct ReservationInfo {
    pub(crate) chunk_id: ChunkId,
    pub(crate) tables: Vec<DbTable>,
    pub(crate) sub_chunk_ids: Vec<SubChunkId>,
}

/// A held claim on a set of per-subchunk in-memory tables.
///
/// Cloning it increments the underlying refcount (matching the original `ChunkResource` copy
/// semantics); dropping the last clone asks the backend to discard any table whose refcount
/// reached zero. The discard itself is fire-and-forget: [`Drop`] cannot be `async`, so the
/// manager spawns a background task for it rather than blocking the dropping thread. Nothing
/// observes that task's completion; it exists only so the backend eventually frees the table.
#[derive(Debug)]
pub struct Reservation<B: Backend> {
    mgr: Arc<SubchunkMgr<B>>,
    info: ReservationInfo,
}

impl<B: Backend> Reservation<B> {
    pub(crate) fn new(mgr: Arc<SubchunkMgr<B>>, info: ReservationInfo) -> Self {
        Self { mgr, info }
    }

    /// The chunk this reservation covers.
    pub fn chunk_id(&self) -> ChunkId {
        self.info.chunk_id
    }

    /// The qualified tables this reservation covers.
    pub fn tables(&self) -> &[DbTable] {
        &self.info.tables
    }

    /// The subchunks within [`Self::tables`] this reservation covers.
    pub fn sub_chunk_ids(&self) -> &[SubChunkId] {
        &self.info.sub_chunk_ids
    }
}

impl<B: Backend> Clone for Reservation<B> {
    fn clone(&self) -> Self {
        self.mgr.acquire_unit(&self.info);
        Self {
            mgr: Arc::clone(&self.mgr),
            info: self.info.clone(),
        }
    }
}

impl<B: Backend> Drop for Reservation<B> {
    fn drop(&mut self) {
        self.mgr.release(&self.info);
    }
}
