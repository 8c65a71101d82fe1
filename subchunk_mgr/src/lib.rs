#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Reference-counted creation and discard of per-subchunk in-memory tables.
//!
//! Grounded on `wdb::ChunkResource`/`ChunkResourceMgr`/`SQLBackend`: a [`Reservation`] plays the
//! role of `ChunkResource` (copy to add a refcount, destroy to release one), [`SubchunkMgr`]
//! plays `ChunkResourceMgr` (one `parking_lot::Mutex<ChunkEntry>` per chunk, matching the
//! original's per-entry `std::mutex`), and [`Backend`] plays `SQLBackend`, with [`FakeBackend`]
//! standing in for its `FakeBackend` test double.

mod backend;
mod entry;
mod manager;
pub mod mem_lock;
mod reservation;

pub use backend::{
    cleanup_subchunk_script, create_subchunk_script, Backend, BackendError, FakeBackend,
    SUB_CHUNK_COLUMN,
};
pub use manager::{AcquireError, AcquireRequest, SubchunkMgr};
pub use reservation::Reservation;
