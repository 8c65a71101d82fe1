#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! The data model shared by every crate in the worker core: qualified table references, chunk
//! and subchunk identifiers, the scan-rating lattice, the `Task` a scheduler hands a runner,
//! and the `Replica` bookkeeping row the replica store reconciles.
//!
//! This crate also carries the trait boundaries for the collaborators this worker core treats
//! as externally supplied but whose interfaces the core is built against: the low-level
//! database driver, the RPC transport, and the protobuf result/header codec.

mod collaborators;
mod db_table;
mod replica;
mod scan;
mod task;

pub use collaborators::*;
pub use db_table::*;
pub use replica::*;
pub use scan::*;
pub use task::*;

/// The pseudo-chunk used for metadata rows. Always excluded from replication counting.
pub const CHUNK_SENTINEL: i64 = 1_234_567_890;

/// The fixed size of every protoheader envelope on the wire (§6).
pub const PROTOHEADER_ENVELOPE_SIZE: usize = 256;

/// The maximum size, in bytes, of a serialized protoheader within its envelope (§6): the
/// envelope's single length-prefix byte can express at most this much.
pub const PROTOHEADER_MAX_SIZE: usize = 255;

/// Soft per-message size threshold (§4.5, §6): result rows are split into a new message once
/// the current one reaches this size.
pub const RESULT_MESSAGE_SOFT_LIMIT: usize = 2_000_000;

/// Hard per-row size limit (§4.5, §6): a single row exceeding this aborts the fragment with
/// `RowTooLarge`.
pub const RESULT_MESSAGE_HARD_LIMIT: usize = 64_000_000;
