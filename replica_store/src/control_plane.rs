//! Insert-or-update persistence and time-bounded history queries for controllers, jobs,
//! requests, and events (spec §4.7, §6 schema), plus transactions and their contributions.
//!
//! Grounded on `replica/DatabaseServicesMySQL.cc`'s `save*`/`find*` family: "begin transaction
//! -> attempt INSERT -> on duplicate-key, UPDATE the subset of columns that represent mutable
//! state -> commit" (spec §4.7), with the open key/value extension tables upserted via MySQL's
//! native `ON DUPLICATE KEY UPDATE` since there is no "mutable subset" question for a single
//! `(parent_id, param) -> value` pair.

use crate::model::{Controller, Event, ExtState, Job, Request, Transaction, TransactionContrib};
use crate::store::{ReplicaStore, TimeRange};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use iox_time::Time;
use sqlx::{MySql, Row, Transaction as SqlxTransaction};

fn to_time(dt: NaiveDateTime) -> Time {
    Time::from_datetime(DateTime::from_naive_utc_and_offset(dt, Utc))
}

async fn upsert_ext(
    txn: &mut SqlxTransaction<'_, MySql>,
    table: &'static str,
    fk_column: &'static str,
    fk: &str,
    ext: &ExtState,
) -> sqlx::Result<()> {
    for (param, value) in ext {
        let sql = format!(
            "INSERT INTO {table} ({fk_column}, param, value) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE value = VALUES(value)"
        );
        sqlx::query(&sql)
            .bind(fk)
            .bind(param)
            .bind(value)
            .execute(&mut *txn)
            .await?;
    }
    Ok(())
}

impl ReplicaStore {
    /// Insert a `controller` row. Controllers are identified by a fresh ULID per process
    /// startup, so a duplicate key here indicates a `Bug`-class id collision rather than a
    /// legitimate "newer state" update; it is surfaced rather than silently resolved.
    pub async fn save_controller(&self, controller: &Controller) -> Result<()> {
        let controller = controller.clone();
        self.in_transaction("controller", move |txn| {
            let controller = controller.clone();
            async move {
                sqlx::query(
                    "INSERT INTO controller (id, hostname, pid, start_time) VALUES (?, ?, ?, ?)",
                )
                .bind(controller.id.as_str())
                .bind(&controller.hostname)
                .bind(controller.pid)
                .bind(controller.start_time.date_time())
                .execute(&mut *txn)
                .await?;
                Ok(())
            }
        })
        .await
    }

    /// Insert-or-update one `job` row and its `job_ext` entries (spec §4.7).
    pub async fn save_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.in_transaction("job", move |txn| {
            let job = job.clone();
            async move {
                let insert_result = sqlx::query(
                    "INSERT INTO job \
                     (id, controller_id, parent_job_id, type, state, ext_state, begin_time, \
                      end_time, heartbeat_time, priority) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(job.id.as_str())
                .bind(job.controller_id.as_str())
                .bind(job.parent_job_id.as_ref().map(|p| p.as_str()))
                .bind(&job.job_type)
                .bind(job.state.as_db_str())
                .bind(&job.ext_state)
                .bind(job.begin_time.date_time())
                .bind(job.end_time.map(|t| t.date_time()))
                .bind(job.heartbeat_time.date_time())
                .bind(job.priority)
                .execute(&mut *txn)
                .await;

                match insert_result {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                        sqlx::query(
                            "UPDATE job SET state = ?, ext_state = ?, end_time = ?, \
                             heartbeat_time = ?, priority = ? WHERE id = ?",
                        )
                        .bind(job.state.as_db_str())
                        .bind(&job.ext_state)
                        .bind(job.end_time.map(|t| t.date_time()))
                        .bind(job.heartbeat_time.date_time())
                        .bind(job.priority)
                        .bind(job.id.as_str())
                        .execute(&mut *txn)
                        .await?;
                    }
                    Err(e) => return Err(e),
                }

                upsert_ext(txn, "job_ext", "job_id", job.id.as_str(), &job.ext).await?;
                Ok(())
            }
        })
        .await
    }

    /// Insert-or-update one `request` row and its `request_ext` entries.
    pub async fn save_request(&self, request: &Request) -> Result<()> {
        let request = request.clone();
        self.in_transaction("request", move |txn| {
            let request = request.clone();
            async move {
                let insert_result = sqlx::query(
                    "INSERT INTO request \
                     (id, job_id, name, worker, priority, state, ext_state, server_status, \
                      c_create_time, c_start_time, c_finish_time, w_receive_time, w_start_time, \
                      w_finish_time) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(request.id.as_str())
                .bind(request.job_id.as_str())
                .bind(&request.name)
                .bind(&request.worker)
                .bind(request.priority)
                .bind(request.state.as_db_str())
                .bind(&request.ext_state)
                .bind(&request.server_status)
                .bind(request.c_create_time.date_time())
                .bind(request.c_start_time.map(|t| t.date_time()))
                .bind(request.c_finish_time.map(|t| t.date_time()))
                .bind(request.w_receive_time.map(|t| t.date_time()))
                .bind(request.w_start_time.map(|t| t.date_time()))
                .bind(request.w_finish_time.map(|t| t.date_time()))
                .execute(&mut *txn)
                .await;

                match insert_result {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                        sqlx::query(
                            "UPDATE request SET state = ?, ext_state = ?, server_status = ?, \
                             c_start_time = ?, c_finish_time = ?, w_receive_time = ?, \
                             w_start_time = ?, w_finish_time = ? WHERE id = ?",
                        )
                        .bind(request.state.as_db_str())
                        .bind(&request.ext_state)
                        .bind(&request.server_status)
                        .bind(request.c_start_time.map(|t| t.date_time()))
                        .bind(request.c_finish_time.map(|t| t.date_time()))
                        .bind(request.w_receive_time.map(|t| t.date_time()))
                        .bind(request.w_start_time.map(|t| t.date_time()))
                        .bind(request.w_finish_time.map(|t| t.date_time()))
                        .bind(request.id.as_str())
                        .execute(&mut *txn)
                        .await?;
                    }
                    Err(e) => return Err(e),
                }

                upsert_ext(txn, "request_ext", "request_id", request.id.as_str(), &request.ext)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    /// Append one `controller_log` event and its `controller_log_ext` entries. Events are
    /// append-only audit entries; a duplicate id here is a `Bug`-class id collision rather than
    /// a legitimate update.
    pub async fn log_event(&self, event: &Event) -> Result<()> {
        let event = event.clone();
        self.in_transaction("controller_log", move |txn| {
            let event = event.clone();
            async move {
                sqlx::query(
                    "INSERT INTO controller_log \
                     (id, controller_id, time, task, operation, status, request_id, job_id) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(event.id.as_str())
                .bind(event.controller_id.as_str())
                .bind(event.time.date_time())
                .bind(&event.task)
                .bind(&event.operation)
                .bind(event.status.as_db_str())
                .bind(event.request_id.as_ref().map(|r| r.as_str()))
                .bind(event.job_id.as_ref().map(|j| j.as_str()))
                .execute(&mut *txn)
                .await?;

                upsert_ext(
                    txn,
                    "controller_log_ext",
                    "controller_log_id",
                    event.id.as_str(),
                    &event.ext,
                )
                .await?;
                Ok(())
            }
        })
        .await
    }

    /// Jobs owned by `controller_id`, most recently started first, bounded by `range` (spec
    /// §4.7 "Time-range queries").
    pub async fn jobs_in_range(&self, controller_id: &str, range: TimeRange) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT id, controller_id, parent_job_id, type, state, ext_state, begin_time, \
             end_time, heartbeat_time, priority FROM job WHERE controller_id = ? \
             ORDER BY begin_time DESC",
        )
        .bind(controller_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let begin_time = to_time(row.try_get("begin_time")?);
            if !range.matches(begin_time) {
                continue;
            }
            let state_str: String = row.try_get("state")?;
            out.push(Job {
                id: crate::ids::JobId::from_string(row.try_get::<String, _>("id")?),
                controller_id: crate::ids::ControllerId::from_string(
                    row.try_get::<String, _>("controller_id")?,
                ),
                parent_job_id: row
                    .try_get::<Option<String>, _>("parent_job_id")?
                    .map(crate::ids::JobId::from_string),
                job_type: row.try_get("type")?,
                state: crate::model::JobState::from_db_str(&state_str).ok_or_else(|| {
                    Error::InvalidArgument {
                        message: format!("unrecognized job state {state_str}"),
                    }
                })?,
                ext_state: row.try_get("ext_state")?,
                begin_time,
                end_time: row
                    .try_get::<Option<NaiveDateTime>, _>("end_time")?
                    .map(to_time),
                heartbeat_time: to_time(row.try_get("heartbeat_time")?),
                priority: row.try_get("priority")?,
                ext: Default::default(),
            });
            if range.max_entries != 0 && out.len() == range.max_entries {
                break;
            }
        }
        Ok(out)
    }

    /// Requests belonging to `job_id`, most recently started (controller-side) first, bounded
    /// by `range`.
    pub async fn requests_in_range(
        &self,
        job_id: &str,
        range: TimeRange,
    ) -> Result<Vec<Request>> {
        let rows = sqlx::query(
            "SELECT id, job_id, name, worker, priority, state, ext_state, server_status, \
             c_create_time, c_start_time, c_finish_time, w_receive_time, w_start_time, \
             w_finish_time FROM request WHERE job_id = ? ORDER BY c_create_time DESC",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let c_create_time = to_time(row.try_get("c_create_time")?);
            if !range.matches(c_create_time) {
                continue;
            }
            let state_str: String = row.try_get("state")?;
            out.push(Request {
                id: crate::ids::RequestId::from_string(row.try_get::<String, _>("id")?),
                job_id: crate::ids::JobId::from_string(row.try_get::<String, _>("job_id")?),
                name: row.try_get("name")?,
                worker: row.try_get("worker")?,
                priority: row.try_get("priority")?,
                state: crate::model::RequestState::from_db_str(&state_str).ok_or_else(|| {
                    Error::InvalidArgument {
                        message: format!("unrecognized request state {state_str}"),
                    }
                })?,
                ext_state: row.try_get("ext_state")?,
                server_status: row.try_get("server_status")?,
                c_create_time,
                c_start_time: row
                    .try_get::<Option<NaiveDateTime>, _>("c_start_time")?
                    .map(to_time),
                c_finish_time: row
                    .try_get::<Option<NaiveDateTime>, _>("c_finish_time")?
                    .map(to_time),
                w_receive_time: row
                    .try_get::<Option<NaiveDateTime>, _>("w_receive_time")?
                    .map(to_time),
                w_start_time: row
                    .try_get::<Option<NaiveDateTime>, _>("w_start_time")?
                    .map(to_time),
                w_finish_time: row
                    .try_get::<Option<NaiveDateTime>, _>("w_finish_time")?
                    .map(to_time),
                ext: Default::default(),
            });
            if range.max_entries != 0 && out.len() == range.max_entries {
                break;
            }
        }
        Ok(out)
    }

    /// Events logged by `controller_id`, most recent first, bounded by `range`.
    pub async fn events_in_range(&self, controller_id: &str, range: TimeRange) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT id, controller_id, time, task, operation, status, request_id, job_id \
             FROM controller_log WHERE controller_id = ? ORDER BY time DESC",
        )
        .bind(controller_id)
        .fetch_all(self.pool())
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let time = to_time(row.try_get("time")?);
            if !range.matches(time) {
                continue;
            }
            let status_str: String = row.try_get("status")?;
            out.push(Event {
                id: crate::ids::EventId::from_string(row.try_get::<String, _>("id")?),
                controller_id: crate::ids::ControllerId::from_string(
                    row.try_get::<String, _>("controller_id")?,
                ),
                time,
                task: row.try_get("task")?,
                operation: row.try_get("operation")?,
                status: crate::model::EventState::from_db_str(&status_str).ok_or_else(|| {
                    Error::InvalidArgument {
                        message: format!("unrecognized event status {status_str}"),
                    }
                })?,
                request_id: row
                    .try_get::<Option<String>, _>("request_id")?
                    .map(crate::ids::RequestId::from_string),
                job_id: row
                    .try_get::<Option<String>, _>("job_id")?
                    .map(crate::ids::JobId::from_string),
                ext: Default::default(),
            });
            if range.max_entries != 0 && out.len() == range.max_entries {
                break;
            }
        }
        Ok(out)
    }

    /// Insert-or-update one `transaction` row.
    pub async fn save_transaction(&self, txn_row: &Transaction) -> Result<()> {
        let txn_row = txn_row.clone();
        self.in_transaction("transaction", move |txn| {
            let txn_row = txn_row.clone();
            async move {
                let insert_result = sqlx::query(
                    "INSERT INTO transaction (id, database, state, begin_time, end_time, context) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(txn_row.id.as_str())
                .bind(&txn_row.database)
                .bind(txn_row.state.as_db_str())
                .bind(txn_row.begin_time.date_time())
                .bind(txn_row.end_time.map(|t| t.date_time()))
                .bind(&txn_row.context)
                .execute(&mut *txn)
                .await;

                match insert_result {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                        sqlx::query(
                            "UPDATE transaction SET state = ?, end_time = ? WHERE id = ?",
                        )
                        .bind(txn_row.state.as_db_str())
                        .bind(txn_row.end_time.map(|t| t.date_time()))
                        .bind(txn_row.id.as_str())
                        .execute(&mut *txn)
                        .await?;
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            }
        })
        .await
    }

    /// Insert one `transaction_contrib` row. Contributions are identified by an auto-increment
    /// id assigned on insert, so this is insert-only from the caller's side; re-reporting
    /// progress on the same contribution is a separate `update_transaction_contrib` call.
    pub async fn insert_transaction_contrib(&self, contrib: &TransactionContrib) -> Result<u64> {
        let contrib = contrib.clone();
        self.in_transaction("transaction_contrib", move |txn| {
            let contrib = contrib.clone();
            async move {
                sqlx::query(
                    "INSERT INTO transaction_contrib \
                     (transaction_id, worker, database, `table`, chunk, is_overlap, url, \
                      `type`, num_bytes, num_rows, create_time, start_time, read_time, \
                      load_time, status, tmp_file, http_error, system_error, error, \
                      retry_allowed) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(contrib.transaction_id.as_str())
                .bind(&contrib.worker)
                .bind(&contrib.database)
                .bind(&contrib.table)
                .bind(contrib.chunk.0)
                .bind(contrib.is_overlap)
                .bind(&contrib.url)
                .bind(&contrib.contrib_type)
                .bind(contrib.num_bytes as i64)
                .bind(contrib.num_rows as i64)
                .bind(contrib.create_time.date_time())
                .bind(contrib.start_time.map(|t| t.date_time()))
                .bind(contrib.read_time.map(|t| t.date_time()))
                .bind(contrib.load_time.map(|t| t.date_time()))
                .bind(&contrib.status)
                .bind(&contrib.tmp_file)
                .bind(contrib.http_error)
                .bind(contrib.system_error)
                .bind(&contrib.error)
                .bind(contrib.retry_allowed)
                .execute(&mut *txn)
                .await?;

                let id: u64 = sqlx::query_scalar("SELECT LAST_INSERT_ID()")
                    .fetch_one(&mut *txn)
                    .await?;
                Ok(id)
            }
        })
        .await
    }
}
