#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Insert-or-update persistence and history queries for controllers, jobs, requests, events,
//! replicas, and transactions (C7), plus the set-theoretic reconciliation of a worker's
//! reported replica collection against persisted state.
//!
//! Grounded on `replica/DatabaseServicesMySQL.{h,cc}` for the schema and insert-or-update
//! pattern, and `replica/QservGetReplicasJob.{h,cc}` / `replica/GetReplicasQservMgtRequest.cc`
//! for the collection-reconciliation calling convention. The database connection itself is a
//! `sqlx::MySqlPool`, matching the teacher workspace's own use of `sqlx` (`sqlx-hotswap-pool`)
//! rather than a hand-rolled driver.

mod batch;
mod config;
mod control_plane;
mod ids;
mod model;
mod reconcile;
mod replica;
mod replica_job;
mod replication_metrics;
mod store;

pub use batch::file_fetch_batch_size;
pub use config::ReplicaJobConfig;
pub use ids::{ControllerId, EventId, JobId, RequestId, TransactionId};
pub use model::{
    Controller, Event, EventState, Job, JobState, Request, RequestState, Transaction,
    TransactionContrib, TransactionState,
};
pub use reconcile::{ReconcileOutcome, SaveReplicaOutcome};
pub use replica_job::{GetReplicasJob, ReplicaSource, ReplicaSourceError, WorkerReplicaReport};
pub use replication_metrics::ReplicationLevelCount;
pub use store::{ReplicaStore, TimeRange};

/// Errors surfaced at the persistence boundary. These are the `replica_store`-local realization
/// of spec §7's `DuplicateKey` / `DeadlockRetry` / `NotFound` / `InvalidArgument` kinds; `Bug`
/// is not a variant here because invariant violations in this crate (e.g. a negative-count
/// orphan-chunk aggregation) panic, matching the rest of the core.
#[derive(Debug, snafu::Snafu)]
pub enum Error {
    /// The driver reported an error that isn't one of the specially-handled cases below.
    #[snafu(display("database error: {source}"))]
    Database {
        /// The underlying driver error.
        source: sqlx::Error,
    },
    /// An INSERT hit a unique constraint that neither the automatic UPDATE fallback nor the
    /// delete-then-insert recursion path could resolve.
    #[snafu(display("duplicate key on {entity}"))]
    DuplicateKey {
        /// The entity (table) the collision occurred on.
        entity: &'static str,
    },
    /// A transaction was retried once after a deadlock and failed again.
    #[snafu(display("deadlock persisted after one retry on {entity}"))]
    DeadlockRetry {
        /// The entity (table) the deadlock occurred on.
        entity: &'static str,
    },
    /// A history-query lookup found no matching row.
    #[snafu(display("no {entity} found for id {id}"))]
    NotFound {
        /// The entity (table) that was queried.
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },
    /// An unknown database/worker, empty id, or a reversed time range was supplied.
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument {
        /// Description of what was invalid.
        message: String,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Database { source }
    }
}

/// A `Result` specialized to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
