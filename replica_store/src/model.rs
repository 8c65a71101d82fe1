//! Row types for the control-plane schema (§6 "Database schema"). Each carries a state enum
//! and a `(create, start, finish)` timing triplet per spec §3, plus an `ext` key/value map
//! standing in for the sibling `*_ext` table.
//!
//! Grounded on `replica/DatabaseServicesMySQL.cc`'s `Job`/`Request`/`ControllerEvent` structs
//! and `replica/Transaction.h`.

use crate::ids::{ControllerId, EventId, JobId, RequestId, TransactionId};
use iox_time::Time;
use std::collections::BTreeMap;

/// A worker-assigned "extension" map: arbitrary key/value pairs a job or request produces,
/// persisted in the sibling `*_ext` table keyed by the parent's id.
pub type ExtState = BTreeMap<String, String>;

/// `job.state` / `request.state`. The source distinguishes many fine-grained states per
/// operation type; this core collapses them to the lifecycle shape every caller actually
/// switches on (§3's "state enum"), matching `Job::State` / `Request::State` in
/// `replica/DatabaseServicesMySQL.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Row inserted, not yet started.
    Created,
    /// Currently executing.
    InProgress,
    /// Completed successfully.
    Finished,
    /// Completed with a failure.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl JobState {
    /// The string stored in the `state` column.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InProgress => "IN_PROGRESS",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse a value previously produced by [`Self::as_db_str`].
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "CREATED" => Self::Created,
            "IN_PROGRESS" => Self::InProgress,
            "FINISHED" => Self::Finished,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }
}

/// `request.state`. Shares its vocabulary with [`JobState`] (a request is, structurally, a
/// smaller job scoped to one worker) but kept as a distinct type so a `JobState` can't be
/// written into a `request` row by accident.
pub type RequestState = JobState;

/// A controller process: one per czar or worker-management daemon that owns jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct Controller {
    /// Identity.
    pub id: ControllerId,
    /// Hostname the controller is running on.
    pub hostname: String,
    /// OS process id.
    pub pid: u32,
    /// When the controller process started.
    pub start_time: Time,
}

/// One `job` row: a unit of control-plane work, optionally nested under a parent job
/// (`parent_job_id -> job_id`, §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Identity.
    pub id: JobId,
    /// The controller that owns this job.
    pub controller_id: ControllerId,
    /// The parent job, if this job was spawned as a sub-job.
    pub parent_job_id: Option<JobId>,
    /// The job type name (e.g. `"REPLICA_FIND_ALL"`), opaque to this store.
    pub job_type: String,
    /// Lifecycle state.
    pub state: JobState,
    /// Free-form sub-state within `state`, e.g. which phase of a multi-step job is active.
    pub ext_state: String,
    /// When the job row was created/started (the schema's single `begin_time` column covers
    /// both halves of spec §3's create/start timing pair for jobs).
    pub begin_time: Time,
    /// When execution finished, once finished.
    pub end_time: Option<Time>,
    /// Last heartbeat, updated at least once per configured heartbeat interval (§9 open
    /// question (b)) while the job runs.
    pub heartbeat_time: Time,
    /// Scheduling priority; higher runs first among pending jobs of the same controller.
    pub priority: i32,
    /// Arbitrary key/value pairs produced by this job (`job_ext`).
    pub ext: ExtState,
}

/// One `request` row: a single worker-addressed unit of work belonging to a job
/// (`job_id -> request_id`, §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Identity.
    pub id: RequestId,
    /// The job this request belongs to.
    pub job_id: JobId,
    /// Human-readable request name (e.g. `"REPLICA_CREATE"`).
    pub name: String,
    /// The worker this request targets.
    pub worker: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Lifecycle state.
    pub state: RequestState,
    /// Free-form sub-state within `state`.
    pub ext_state: String,
    /// Status string last reported by the worker's own server, independent of `state`.
    pub server_status: String,
    /// When the controller created this request.
    pub c_create_time: Time,
    /// When the controller started sending this request.
    pub c_start_time: Option<Time>,
    /// When the controller considered this request finished.
    pub c_finish_time: Option<Time>,
    /// When the worker received this request.
    pub w_receive_time: Option<Time>,
    /// When the worker started processing this request.
    pub w_start_time: Option<Time>,
    /// When the worker finished processing this request.
    pub w_finish_time: Option<Time>,
    /// Arbitrary key/value pairs produced by this request (`request_ext`).
    pub ext: ExtState,
}

/// `controller_log.status`. Distinct from [`JobState`]: an event records the outcome of one
/// logged operation, not an evolving lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// The logged operation is still running.
    InProgress,
    /// The logged operation completed successfully.
    Success,
    /// The logged operation failed.
    Fail,
}

impl EventState {
    /// The string stored in the `status` column.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Fail => "FAIL",
        }
    }

    /// Parse a value previously produced by [`Self::as_db_str`].
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "IN_PROGRESS" => Self::InProgress,
            "SUCCESS" => Self::Success,
            "FAIL" => Self::Fail,
            _ => return None,
        })
    }
}

/// One `controller_log` row (an "event" in spec §3's terminology): a free-text audit trail
/// entry, optionally tied to the job or request it was logged for.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Identity.
    pub id: EventId,
    /// The controller that logged this event.
    pub controller_id: ControllerId,
    /// When the event was logged.
    pub time: Time,
    /// The subsystem or task name that logged this event.
    pub task: String,
    /// The operation being logged (e.g. `"CREATE_REPLICA"`).
    pub operation: String,
    /// The outcome of that operation.
    pub status: EventState,
    /// The request this event pertains to, if any.
    pub request_id: Option<RequestId>,
    /// The job this event pertains to, if any.
    pub job_id: Option<JobId>,
    /// Arbitrary key/value pairs attached to this event (`controller_log_ext`).
    pub ext: ExtState,
}

/// `transaction.state`, mirroring `replica::TransactionState` in the original source's
/// super-transaction bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting contributions.
    Started,
    /// No longer accepting new contributions; draining in-flight ones.
    IsFinishing,
    /// All contributions landed; the transaction is closed.
    Finished,
    /// Being rolled back.
    IsAborting,
    /// Rolled back.
    Aborted,
}

impl TransactionState {
    /// The string stored in the `state` column.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::IsFinishing => "IS_FINISHING",
            Self::Finished => "FINISHED",
            Self::IsAborting => "IS_ABORTING",
            Self::Aborted => "ABORTED",
        }
    }

    /// Parse a value previously produced by [`Self::as_db_str`].
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "STARTED" => Self::Started,
            "IS_FINISHING" => Self::IsFinishing,
            "FINISHED" => Self::Finished,
            "IS_ABORTING" => Self::IsAborting,
            "ABORTED" => Self::Aborted,
            _ => return None,
        })
    }
}

/// One `transaction` row: a super-transaction scoping a batch of worker-side table loads for
/// one database.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Identity.
    pub id: TransactionId,
    /// The database this transaction loads into.
    pub database: String,
    /// Lifecycle state.
    pub state: TransactionState,
    /// When the transaction was opened.
    pub begin_time: Time,
    /// When the transaction closed (committed or aborted), if it has.
    pub end_time: Option<Time>,
    /// Free-form context string supplied by the caller that opened the transaction.
    pub context: String,
}

/// One `transaction_contrib` row: one worker's contribution (a single table/chunk load) to a
/// [`Transaction`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionContrib {
    /// Identity.
    pub id: u64,
    /// The transaction this contribution belongs to.
    pub transaction_id: TransactionId,
    /// The worker that performed the load.
    pub worker: String,
    /// The database the table belongs to.
    pub database: String,
    /// The table that was loaded into.
    pub table: String,
    /// The chunk this contribution covers.
    pub chunk: qserv_types::ChunkId,
    /// True if this contribution loads the chunk's overlap table rather than its primary one.
    pub is_overlap: bool,
    /// Source URL the data was read from.
    pub url: String,
    /// Contribution type tag (e.g. `"L"` for local file, `"R"` for remote).
    pub contrib_type: String,
    /// Bytes read from the source.
    pub num_bytes: u64,
    /// Rows loaded.
    pub num_rows: u64,
    /// When the contribution row was created.
    pub create_time: Time,
    /// When reading from the source started.
    pub start_time: Option<Time>,
    /// When reading from the source finished.
    pub read_time: Option<Time>,
    /// When the load into the destination table finished.
    pub load_time: Option<Time>,
    /// Free-form status tag for this contribution.
    pub status: String,
    /// Path of a temporary file used during the load, if any.
    pub tmp_file: Option<String>,
    /// HTTP status code, if the source was fetched over HTTP.
    pub http_error: Option<i32>,
    /// Local system error number, if the load failed at the OS level.
    pub system_error: Option<i32>,
    /// Human-readable error message, if the contribution failed.
    pub error: Option<String>,
    /// Whether the coordinator is allowed to retry this contribution.
    pub retry_allowed: bool,
}
