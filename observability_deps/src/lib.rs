//! A crate to define dependencies for tracing and logging in the Qserv worker core.
//!
//! Although we do not use these crates directly in this crate, by having the versions in a
//! single crate we can require only one single version of the underlying crates, and have
//! a single place to handle updates.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub use tracing;
