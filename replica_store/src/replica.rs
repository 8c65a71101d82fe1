//! Single-replica persistence (spec §4.7 "Replica save (single)"): COMPLETE replicas are
//! inserted as one `replica` row plus one `replica_file` row per file; an incomplete replica is
//! instead deleted. A duplicate-key on insert means "a newer verification of the same replica
//! arrived" and is handled by one delete-then-insert pass.
//!
//! Grounded on `replica/DatabaseServicesMySQL.cc`'s `saveReplicaInfo`.

use crate::store::ReplicaStore;
use crate::{Error, Result};
use qserv_types::{ChunkId, Replica};
use sqlx::{MySql, Row, Transaction};

/// What [`ReplicaStore::save_replica`] actually did, so callers (e.g. the collection
/// reconciler) can count inserts/deletes without a second round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReplicaOutcome {
    /// A new `replica` row (and its files) were inserted.
    Inserted,
    /// The replica was not COMPLETE, so its row (and cascaded files) were deleted instead.
    Deleted,
    /// A duplicate-key insert triggered a delete of the prior row followed by a fresh insert.
    ReplacedAfterDuplicate,
}

enum InsertAttempt {
    Inserted,
    Duplicate,
}

impl ReplicaStore {
    /// Save one replica, following spec §4.7's COMPLETE/incomplete branching.
    pub async fn save_replica(&self, replica: &Replica) -> Result<SaveReplicaOutcome> {
        if !replica.is_complete() {
            self.delete_replica_row(&replica.worker, &replica.database, replica.chunk)
                .await?;
            return Ok(SaveReplicaOutcome::Deleted);
        }

        match self.try_insert_replica(replica).await? {
            InsertAttempt::Inserted => Ok(SaveReplicaOutcome::Inserted),
            InsertAttempt::Duplicate => {
                self.delete_replica_row(&replica.worker, &replica.database, replica.chunk)
                    .await?;
                match self.try_insert_replica(replica).await? {
                    InsertAttempt::Inserted => Ok(SaveReplicaOutcome::ReplacedAfterDuplicate),
                    InsertAttempt::Duplicate => Err(Error::DuplicateKey { entity: "replica" }),
                }
            }
        }
    }

    /// DELETE the `(worker, database, chunk)` row; `replica_file` rows cascade with it
    /// (spec §3: "file rows are cascade-owned by the replica row").
    pub async fn delete_replica_row(
        &self,
        worker: &str,
        database: &str,
        chunk: ChunkId,
    ) -> Result<()> {
        let worker = worker.to_string();
        let database = database.to_string();
        self.in_transaction("replica", move |txn| {
            let worker = worker.clone();
            let database = database.clone();
            async move {
                sqlx::query(
                    "DELETE FROM replica WHERE worker = ? AND database = ? AND chunk = ?",
                )
                .bind(worker)
                .bind(database)
                .bind(chunk.0)
                .execute(&mut *txn)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn try_insert_replica(&self, replica: &Replica) -> Result<InsertAttempt> {
        let replica = replica.clone();
        self.in_transaction("replica", move |txn| {
            let replica = replica.clone();
            async move { insert_replica_once(txn, &replica).await }
        })
        .await
    }

    /// Read back every replica reported by `worker` for `database`, used by the collection
    /// reconciler to compute the "old" side of the diff (spec §4.7 "Replica save
    /// (collection)", step 2).
    pub async fn replicas_for_worker_database(
        &self,
        worker: &str,
        database: &str,
    ) -> Result<Vec<Replica>> {
        let rows = sqlx::query(
            "SELECT id, worker, database, chunk, verify_time FROM replica \
             WHERE worker = ? AND database = ?",
        )
        .bind(worker)
        .bind(database)
        .fetch_all(self.pool())
        .await?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut replicas = Vec::with_capacity(rows.len());
        for row in rows {
            let id: u64 = row.try_get("id")?;
            ids.push(id);
            replicas.push((
                id,
                Replica {
                    worker: row.try_get("worker")?,
                    database: row.try_get("database")?,
                    chunk: ChunkId(row.try_get("chunk")?),
                    verify_time: iox_time::Time::from_datetime(row.try_get("verify_time")?),
                    files: Vec::new(),
                },
            ));
        }

        let files_by_replica = self.fetch_files_batched(&ids).await?;
        for (id, replica) in &mut replicas {
            if let Some(files) = files_by_replica.get(id) {
                replica.files = files.clone();
            }
        }
        Ok(replicas.into_iter().map(|(_, r)| r).collect())
    }
}

async fn insert_replica_once(
    txn: &mut Transaction<'_, MySql>,
    replica: &Replica,
) -> sqlx::Result<InsertAttempt> {
    let insert_result =
        sqlx::query("INSERT INTO replica (worker, database, chunk, verify_time) VALUES (?, ?, ?, ?)")
            .bind(&replica.worker)
            .bind(&replica.database)
            .bind(replica.chunk.0)
            .bind(replica.verify_time.date_time())
            .execute(&mut *txn)
            .await;

    let replica_id: u64 = match insert_result {
        Ok(_) => sqlx::query_scalar("SELECT LAST_INSERT_ID()")
            .fetch_one(&mut *txn)
            .await?,
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Ok(InsertAttempt::Duplicate);
        }
        Err(err) => return Err(err),
    };

    for file in &replica.files {
        sqlx::query(
            "INSERT INTO replica_file \
             (replica_id, name, size, mtime, cs, begin_create_time, end_create_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(replica_id)
        .bind(&file.name)
        .bind(file.size as i64)
        .bind(file.mtime.date_time())
        .bind(file.checksum as i64)
        .bind(file.begin_transfer_time.map(|t| t.date_time()))
        .bind(file.end_transfer_time.map(|t| t.date_time()))
        .execute(&mut *txn)
        .await?;
    }

    Ok(InsertAttempt::Inserted)
}
