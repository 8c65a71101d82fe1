//! Trait boundaries for the collaborators this worker core treats as externally supplied: the
//! distributed RPC transport, the protobuf result/header codec, and the SQL driver. The worker
//! core is built against these interfaces; a production deployment supplies real
//! implementations.

use async_trait::async_trait;

/// The schema of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumnSchema {
    /// Column name.
    pub name: String,
    /// Whether the column has a declared default value.
    pub has_default: bool,
    /// The default value, if any, serialized as the originating SQL dialect would render it.
    pub default_value: Option<String>,
    /// The SQL type as a display string (e.g. `"INT"`, `"VARCHAR(255)"`).
    pub sql_type: String,
    /// The underlying driver's numeric type code.
    pub mysql_type: i32,
}

/// One row's worth of column values. `None` at index `i` means column `i` is NULL for this row,
/// matching the "parallel isnull bits" wire representation of the result protobuf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBundle {
    /// Column values; `None` denotes SQL NULL.
    pub columns: Vec<Option<Vec<u8>>>,
}

/// The result protobuf message: a schema, zero or more row bundles, a continuation flag,
/// and an optional error message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultProto {
    /// Column schema, present on at least the first message of a result.
    pub schema: Vec<ResultColumnSchema>,
    /// The rows carried by this message.
    pub rows: Vec<RowBundle>,
    /// True if more messages for this result will follow.
    pub continues: bool,
    /// Set instead of (or in addition to) rows when the task failed; rendered as
    /// `chunk #N: err1; err2; ...`.
    pub errormsg: Option<String>,
}

/// The fixed-size framing envelope that precedes every payload on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoHeader {
    /// Always [`crate::MIN_SUPPORTED_PROTOCOL`] or higher; this core emits exactly that value.
    pub protocol: u32,
    /// Size, in bytes, of the payload that follows this header.
    pub size: u32,
    /// MD5 digest of the payload that follows this header.
    pub md5: [u8; 16],
    /// Hostname of the worker sending this message.
    pub wname: String,
    /// True on the final message of a reply (the summary message).
    pub endnodata: bool,
}

/// Errors the transport collaborator may report back to a sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport already reported the request as finished; further sends are no-ops.
    #[error("transport reported the request as finished")]
    Dead,
    /// A lower-level I/O or protocol failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// The distributed RPC transport collaborator: request/response with a streaming reply
/// body. The result channel sends framed buffers through this trait and waits for the
/// transport to confirm each buffer has been consumed before releasing it back to the caller.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync + 'static {
    /// Send one already-framed buffer. Resolves once the transport has taken ownership of the
    /// buffer's bytes (so the caller's memory can be reused), not once it has reached the peer.
    async fn send(&self, buf: Vec<u8>) -> Result<(), TransportError>;

    /// Whether the transport has independently reported this request as finished (e.g. the
    /// receiving czar went away). `result_channel::Channel::is_dead` ORs this with its own kill
    /// flag.
    fn is_finished(&self) -> bool;
}

/// Errors surfaced by the low-level database driver collaborator: prepared-statement escaping,
/// bulk-upload hooks, and result-set iteration are assumed to live behind this boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SqlError {
    /// The connection could not be established or was lost mid-query.
    #[error("sql connection error: {0}")]
    Connection(String),
    /// The server rejected the statement.
    #[error("sql error: {0}")]
    Query(String),
}

/// The outcome of asking the driver to cancel an in-flight query by connection id. All four are
/// logged by the caller; none is treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing was running on that connection; no action taken.
    Nop,
    /// The kill command reached the server and the query was cancelled.
    Success,
    /// Could not even open a connection to issue the kill.
    ConnectToKillFailed,
    /// Connected, but the server rejected or failed to process the kill.
    ProcessingKillFailed,
}

/// One materialized result row, paired with the schema it was read against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlRow {
    /// Column values in schema order; `None` is SQL NULL.
    pub columns: Vec<Option<Vec<u8>>>,
}

impl SqlRow {
    /// The length, in bytes, of the longest-possible rendering of this row: the sum of every
    /// column's raw byte length. Mirrors `mysql::Row::minRowSize` from the original, used by
    /// `row_codec` to decide when to switch to the large-row path.
    pub fn min_row_size(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.as_ref().map_or(0, Vec::len))
            .sum()
    }
}

/// An unbuffered (server-side cursor) result set being pulled row-at-a-time.
#[async_trait]
pub trait RowStream: Send {
    /// The schema of the rows this stream yields, known once the query starts returning rows.
    fn schema(&self) -> &[ResultColumnSchema];

    /// Pull the next row, or `None` at end of result set.
    async fn next_row(&mut self) -> Result<Option<SqlRow>, SqlError>;
}

/// One live database connection, scoped to a single task's lifetime.
#[async_trait]
pub trait SqlConnection: std::fmt::Debug + Send + Sync + 'static {
    /// The driver-level connection identifier used to target a cancellation request at this
    /// specific connection.
    fn connection_id(&self) -> u64;

    /// Set the per-task user identity that subsequent queries run as.
    async fn set_user(&mut self, user: &str) -> Result<(), SqlError>;

    /// Run a statement that returns no result set (e.g. `CREATE TABLE ... SELECT`, `DROP TABLE`).
    async fn execute(&mut self, sql: &str) -> Result<(), SqlError>;

    /// Run a query as an unbuffered, server-side-cursor result set.
    async fn query_unbuffered(&mut self, sql: &str) -> Result<Box<dyn RowStream>, SqlError>;
}

/// The low-level database driver collaborator: connection admission plumbing lives in
/// `task_runner::SqlConnMgr`, but the connections themselves and their cancellation come from
/// here. Kept as a trait object boundary because the core is built against an assumed-to-exist
/// implementation, never against a concrete driver.
#[async_trait]
pub trait SqlDriver: std::fmt::Debug + Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn SqlConnection>, SqlError>;

    /// Ask the driver to cancel whatever is running on `connection_id`, from a different
    /// connection (the in-flight one cannot service its own cancellation request).
    async fn cancel(&self, connection_id: u64) -> CancelOutcome;
}

/// The protobuf codec collaborator: serializes a [`ProtoHeader`] or [`ResultProto`] to bytes and
/// back. `result_channel` is built against this boundary rather than a concrete protobuf
/// implementation, since the wire schema (§6) is fixed but the generated-code library producing
/// it is assumed to exist outside this core.
pub trait ProtoCodec: std::fmt::Debug + Send + Sync + 'static {
    /// Serialize a protoheader. Must fit in [`crate::PROTOHEADER_MAX_SIZE`] bytes.
    fn encode_header(&self, header: &ProtoHeader) -> Vec<u8>;

    /// Deserialize a protoheader previously produced by [`Self::encode_header`].
    fn decode_header(&self, bytes: &[u8]) -> Result<ProtoHeader, ProtoCodecError>;

    /// Serialize a result payload.
    fn encode_result(&self, result: &ResultProto) -> Vec<u8>;
}

/// Errors from decoding a wire-format protoheader or result payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoCodecError {
    /// The bytes did not parse as a well-formed message.
    #[error("malformed protobuf payload: {0}")]
    Malformed(String),
}
