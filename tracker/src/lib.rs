#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Two small admission primitives reused across the worker core wherever something needs to
//! meter concurrent access without owning the resource being metered:
//!
//! - [`AsyncSemaphore`], a reservation-counting semaphore with a *reserved* sub-pool, used by
//!   `task_runner`'s `SqlConnMgr` (database connection admission, some slots reserved for
//!   interactive queries) and by `result_channel`'s `TransmitMgr` (outbound transmit
//!   concurrency, split between interactive and scan traffic).
//! - [`KeepAlive`], a cloneable RAII handle that keeps a resource's `Arc` alive for exactly as
//!   long as some detached task needs it, without that task owning (or needing a back-reference
//!   into) the resource's driving struct. This is how `result_channel`'s transmit loop holds a
//!   channel alive without the channel depending back on the loop.

mod async_semaphore;
mod keep_alive;

pub use async_semaphore::*;
pub use keep_alive::*;
