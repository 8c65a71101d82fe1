#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Executes one task: waits on its subchunk reservation, admits a database connection, runs
//! each SQL fragment as an unbuffered query, and streams the resulting rows out through a
//! result channel, accumulating per-fragment failures into a single multi-error report.
//!
//! Grounded on `wdb/QueryRunner.{h,cc}` and `wdb/QueryAction.{h,cc}` ([`TaskRunner`]),
//! `wdb`'s connection reservation pattern ([`SqlConnMgr`]), and `util::MultiError`
//! ([`MultiError`]).

mod multi_error;
mod runner;
mod sql_conn_mgr;

pub use multi_error::MultiError;
pub use runner::{Error, Executive, Fragment, TaskRunner};
pub use sql_conn_mgr::{AdmittedConnection, SqlConnMgr, SqlConnMgrConfig};
