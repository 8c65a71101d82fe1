//! The shared connection pool and the insert-or-update transaction helper every persistence
//! path in this crate is built on (spec §4.7: "begin transaction -> attempt INSERT -> on
//! duplicate-key, UPDATE ... -> commit", with single-retry-on-deadlock).
//!
//! Grounded on `replica/DatabaseServicesMySQL.cc`'s `_executeInOwnTransaction` family; the
//! single-connection write mutex mirrors spec §5's "the persistence layer serializes all writes
//! through a single connection mutex (the driver is single-threaded per connection); read paths
//! may share by opening additional connections".

use crate::{Error, Result};
use iox_time::{Time, TimeProvider};
use observability_deps::tracing::warn;
use sqlx::mysql::MySqlDatabaseError;
use sqlx::{MySql, MySqlPool, Transaction};
use std::future::Future;
use std::sync::Arc;

/// MySQL deadlock SQLSTATE ("Deadlock found when trying to get lock").
const SQLSTATE_DEADLOCK: &str = "40001";
/// MySQL lock-wait-timeout SQLSTATE, treated as retryable the same way a deadlock is: both mean
/// "no data was touched, try again".
const SQLSTATE_LOCK_TIMEOUT: &str = "HY000";

fn is_retryable(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    let Some(mysql_err) = db_err.try_downcast_ref::<MySqlDatabaseError>() else {
        return false;
    };
    match mysql_err.code().as_deref() {
        Some(SQLSTATE_DEADLOCK) => true,
        Some(SQLSTATE_LOCK_TIMEOUT) => mysql_err.number() == 1205,
        _ => false,
    }
}

/// A time-bounded history-query selector (spec §4.7 "Time-range queries"): controllers, jobs,
/// requests, and events all support `fromTimeStamp`/`toTimeStamp`/`maxEntries`, with
/// `toTimeStamp = 0` meaning "unbounded future". Modeled here as `to: None` rather than a
/// sentinel zero timestamp, since that is the actual meaning callers want.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    /// Lower bound, inclusive. `None` means "since the beginning of recorded history".
    pub from: Option<Time>,
    /// Upper bound, inclusive. `None` means unbounded future (spec's `toTimeStamp = 0`).
    pub to: Option<Time>,
    /// Maximum rows to return. Results are always ordered descending by start/event time
    /// (spec §4.7), so this keeps the *most recent* `max_entries` matches.
    pub max_entries: usize,
}

impl TimeRange {
    /// Construct a range, rejecting `from > to` (spec §7 `InvalidArgument`: "reverse time
    /// range").
    pub fn new(from: Option<Time>, to: Option<Time>, max_entries: usize) -> Result<Self> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(Error::InvalidArgument {
                    message: "fromTimeStamp is after toTimeStamp".into(),
                });
            }
        }
        Ok(Self {
            from,
            to,
            max_entries,
        })
    }

    /// Unbounded in both directions, capped only by `max_entries`.
    pub fn recent(max_entries: usize) -> Self {
        Self {
            from: None,
            to: None,
            max_entries,
        }
    }

    pub(crate) fn matches(&self, t: Time) -> bool {
        self.from.map_or(true, |from| t >= from) && self.to.map_or(true, |to| t <= to)
    }
}

/// Owns the connection pool backing every table in §6's schema, and the single write mutex
/// spec §5 requires: every mutating call acquires it before opening a transaction, so two
/// concurrent insert-or-update calls can never race each other into a duplicate-key path.
#[derive(Debug)]
pub struct ReplicaStore {
    pub(crate) pool: MySqlPool,
    write_lock: tokio::sync::Mutex<()>,
    pub(crate) clock: Arc<dyn TimeProvider>,
    pub(crate) max_allowed_packet: usize,
}

/// MySQL's own default for `@@max_allowed_packet`, used when the caller hasn't queried the
/// session's actual value.
const DEFAULT_MAX_ALLOWED_PACKET: usize = 16 * 1024 * 1024;

impl ReplicaStore {
    /// Wrap an already-connected pool. Schema migration is out of scope for this core (spec
    /// §1's "does not own storage layout").
    pub fn new(pool: MySqlPool, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
            clock,
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
        }
    }

    /// Override the session's `max_allowed_packet`, e.g. after querying
    /// `SELECT @@max_allowed_packet` on connect. Used by [`crate::file_fetch_batch_size`] to
    /// bound the `IN (...)` batches of `replica_file` lookups (spec §4.7 "Batched file fetch").
    pub fn with_max_allowed_packet(mut self, bytes: usize) -> Self {
        self.max_allowed_packet = bytes;
        self
    }

    /// The pool, for read paths that want to open their own connection rather than serialize
    /// behind the write mutex (spec §5: "read paths may share by opening additional
    /// connections").
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Run `f` once inside a transaction, committing on success and rolling back on any error.
    async fn run_once<F, Fut, T>(&self, f: &F) -> sqlx::Result<T>
    where
        F: Fn(&mut Transaction<'_, MySql>) -> Fut,
        Fut: Future<Output = sqlx::Result<T>>,
    {
        let mut txn = self.pool.begin().await?;
        match f(&mut txn).await {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                // Best-effort: the transaction is dropped regardless, but an explicit rollback
                // surfaces driver-level rollback failures in logs instead of silently dropping
                // them with the handle.
                let _ = txn.rollback().await;
                Err(err)
            }
        }
    }

    /// Run `f` inside a transaction under the single write mutex, retrying exactly once if the
    /// first attempt fails with a deadlock or lock-wait-timeout (spec §4.7, §7
    /// `DeadlockRetry`). Nested transactions are not supported (spec §5): `f` must not itself
    /// call [`Self::in_transaction`].
    pub(crate) async fn in_transaction<F, Fut, T>(&self, entity: &'static str, f: F) -> Result<T>
    where
        F: Fn(&mut Transaction<'_, MySql>) -> Fut,
        Fut: Future<Output = sqlx::Result<T>>,
    {
        let _guard = self.write_lock.lock().await;
        match self.run_once(&f).await {
            Ok(value) => Ok(value),
            Err(err) if is_retryable(&err) => {
                warn!(entity, "deadlock/lock-timeout, retrying once");
                match self.run_once(&f).await {
                    Ok(value) => Ok(value),
                    Err(err) if is_retryable(&err) => Err(Error::DeadlockRetry { entity }),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
