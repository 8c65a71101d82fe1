#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Buffers protobuf result messages, frames them with the 256-byte protoheader envelope,
//! coordinates the single summary message across tasks sharing one channel, and meters
//! outbound transmit concurrency.
//!
//! Grounded on `wbase/SendChannel.cc` ([`Channel`]), `wbase/FileChannelShared.h`
//! ([`FileSpoolChannel`]), and `proto/ProtoHeaderWrap.{h,cc}` ([`protoheader`]). Transmit
//! concurrency metering ([`TransmitMgr`]) reuses `tracker::AsyncSemaphore`, the same admission
//! primitive `task_runner::SqlConnMgr` uses for database connections.

mod channel;
mod file_channel;
pub mod protoheader;
mod transmit_mgr;

pub use channel::{Channel, TransmitData, DEFAULT_QUEUE_CAP};
pub use file_channel::{
    cleanup_results_on_czar_restart, cleanup_results_on_worker_restart, FileSpoolChannel,
};
pub use transmit_mgr::{TransmitMgr, TransmitMgrConfig, TransmitPermit};
