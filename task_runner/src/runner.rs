//! Executes exactly one task: subchunk reservation, SQL fragment execution, and row streaming
//! (§4.5), grounded on `wdb/QueryRunner.{h,cc}` and `wdb/QueryAction.{h,cc}`.

use crate::multi_error::MultiError;
use crate::sql_conn_mgr::SqlConnMgr;
use async_trait::async_trait;
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::{debug, info, warn};
use qserv_types::{
    ProtoCodec, ProtoHeader, ResultColumnSchema, ResultProto, RowBundle, SqlDriver, SqlRow,
    SubChunkId, Task, TaskState, MIN_SUPPORTED_PROTOCOL, RESULT_MESSAGE_HARD_LIMIT,
    RESULT_MESSAGE_SOFT_LIMIT,
};
use result_channel::{protoheader, Channel, FileSpoolChannel, TransmitData};
use row_codec::{Dialect, Encoder};
use snafu::{ResultExt, Snafu};
use std::collections::VecDeque;
use std::sync::Arc;
use subchunk_mgr::{AcquireRequest, Backend, SubchunkMgr};

/// One SQL fragment a task executes: e.g. one subchunk group of a near-neighbor join. A task
/// with a single fragment is the common case; several fragments share the task's [`Channel`]
/// and subchunk reservations are taken and released independently per fragment (§4.5 step 5, 7).
#[derive(Debug, Clone)]
pub struct Fragment {
    /// The database the fragment's tables live in.
    pub db: String,
    /// The SQL text to run, already rewritten against materialized subchunk tables where
    /// applicable (rewriting itself is out of scope, per spec §1).
    pub sql: String,
    /// Unqualified table names this fragment needs subchunk reservations for.
    pub tables: Vec<String>,
    /// Subchunks to reserve; empty means the fragment needs the whole chunk, not a subchunk
    /// slice, and no reservation is taken.
    pub sub_chunk_ids: Vec<SubChunkId>,
}

/// The executive collaborator a task reports completion to (§4.5 step 8), grounded on
/// `wbase::Task::_executive` / `Executive::markCompleted`.
#[async_trait]
pub trait Executive: std::fmt::Debug + Send + Sync + 'static {
    /// Record that `job_id` finished, successfully or not.
    async fn mark_completed(&self, job_id: u64, success: bool);
}

/// Failures from running a task. All are fatal to the fragment/task, never to the process.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The incoming task's protocol version is below [`MIN_SUPPORTED_PROTOCOL`] (§4.5 step 4).
    #[snafu(display("protocol version {got} is unsupported, minimum is {min}"))]
    UnsupportedProtocol {
        /// The version the request declared.
        got: u32,
        /// [`MIN_SUPPORTED_PROTOCOL`].
        min: u32,
    },
    /// A single row exceeded [`RESULT_MESSAGE_HARD_LIMIT`] and cannot be represented.
    #[snafu(display("row of {size} bytes exceeds the hard limit of {limit} bytes"))]
    RowTooLarge {
        /// The offending row's size.
        size: usize,
        /// [`RESULT_MESSAGE_HARD_LIMIT`].
        limit: usize,
    },
    /// The database driver reported an error.
    #[snafu(display("sql error: {source}"))]
    Sql {
        /// The underlying driver error.
        source: qserv_types::SqlError,
    },
    /// Reserving a fragment's subchunk tables failed.
    #[snafu(display("subchunk reservation failed: {source}"))]
    Subchunk {
        /// The underlying manager error.
        source: subchunk_mgr::AcquireError,
    },
    /// The row codec could not encode a row into the configured stream buffer.
    #[snafu(display("row codec error: {source}"))]
    Codec {
        /// The underlying codec error.
        source: row_codec::Error,
    },
    /// Appending to or finalizing the result-file spool failed.
    #[snafu(display("result file spool error: {reason}"))]
    Spool {
        /// The underlying spool error, rendered to a string since the spool's error type isn't
        /// part of `result_channel`'s public surface.
        reason: String,
    },
}

#[derive(Debug)]
struct Metrics {
    rows_streamed_total: Metric<U64Counter>,
    fragments_failed_total: Metric<U64Counter>,
}

/// Runs one [`Task`] end to end against a pluggable backend, driver, channel, and executive.
#[derive(Debug)]
pub struct TaskRunner<B: Backend> {
    subchunk_mgr: Arc<SubchunkMgr<B>>,
    conn_mgr: Arc<SqlConnMgr>,
    driver: Arc<dyn SqlDriver>,
    channel: Arc<Channel>,
    codec: Arc<dyn ProtoCodec>,
    executive: Arc<dyn Executive>,
    wname: String,
    metrics: Metrics,
}

impl<B: Backend> TaskRunner<B> {
    /// Construct a runner wired to its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subchunk_mgr: Arc<SubchunkMgr<B>>,
        conn_mgr: Arc<SqlConnMgr>,
        driver: Arc<dyn SqlDriver>,
        channel: Arc<Channel>,
        codec: Arc<dyn ProtoCodec>,
        executive: Arc<dyn Executive>,
        wname: impl Into<String>,
        registry: &Registry,
    ) -> Self {
        Self {
            subchunk_mgr,
            conn_mgr,
            driver,
            channel,
            codec,
            executive,
            wname: wname.into(),
            metrics: Metrics {
                rows_streamed_total: registry
                    .register_metric("task_runner_rows_streamed_total", "rows streamed to the result channel"),
                fragments_failed_total: registry.register_metric(
                    "task_runner_fragments_failed_total",
                    "query fragments that failed before completion",
                ),
            },
        }
    }

    /// Run `task`'s `fragments` in order. `protocol_version` is the wire protocol version
    /// declared on this request; `is_last_task` tells the runner whether its completion should
    /// attempt to close out the shared channel's last-message coordination (§4.4).
    pub async fn run(
        &self,
        task: &Task,
        fragments: &[Fragment],
        protocol_version: u32,
        is_last_task: bool,
    ) -> Result<(), Error> {
        if protocol_version < MIN_SUPPORTED_PROTOCOL {
            return Err(Error::UnsupportedProtocol {
                got: protocol_version,
                min: MIN_SUPPORTED_PROTOCOL,
            });
        }

        if task.is_cancelled() {
            task.set_state(TaskState::Cancelled);
            return Ok(());
        }
        task.set_state(TaskState::Executing);

        // A multi-fragment task is never admitted as interactive: a stalled interactive slot
        // held by such a task could deadlock against itself (§4.5 step 2).
        let interactive = task.interactive && fragments.len() <= 1;
        let mut admitted = self
            .conn_mgr
            .connect(self.driver.as_ref(), interactive)
            .await
            .context(SqlSnafu)?;
        admitted
            .conn
            .set_user(&format!("qserv_{}", task.czar_id))
            .await
            .context(SqlSnafu)?;

        task.set_state(TaskState::Reading);

        let mut errors = MultiError::new(task.chunk_id);
        let mut schema: Vec<ResultColumnSchema> = Vec::new();
        let mut batch: Vec<RowBundle> = Vec::new();
        let mut batch_size: usize = 0;

        'fragments: for fragment in fragments {
            if task.is_cancelled() {
                task.set_state(TaskState::Cancelled);
                return Ok(());
            }

            let reservation = if fragment.sub_chunk_ids.is_empty() {
                None
            } else {
                match self
                    .subchunk_mgr
                    .acquire(AcquireRequest {
                        db: &fragment.db,
                        chunk_id: task.chunk_id,
                        tables: &fragment.tables,
                        sub_chunk_ids: &fragment.sub_chunk_ids,
                    })
                    .await
                {
                    Ok(r) => Some(r),
                    Err(err) => {
                        errors.push(Error::Subchunk { source: err });
                        self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                        continue 'fragments;
                    }
                }
            };

            let mut stream = match admitted.conn.query_unbuffered(&fragment.sql).await {
                Ok(stream) => stream,
                Err(err) => {
                    errors.push(Error::Sql { source: err });
                    self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                    drop(reservation);
                    continue 'fragments;
                }
            };
            if schema.is_empty() {
                schema = stream.schema().to_vec();
            }

            loop {
                if task.is_cancelled() {
                    task.set_state(TaskState::Cancelled);
                    return Ok(());
                }
                let row = match stream.next_row().await {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(err) => {
                        errors.push(Error::Sql { source: err });
                        self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                        break;
                    }
                };
                let row_size = row.min_row_size();
                if row_size > RESULT_MESSAGE_HARD_LIMIT {
                    errors.push(Error::RowTooLarge {
                        size: row_size,
                        limit: RESULT_MESSAGE_HARD_LIMIT,
                    });
                    self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                    break;
                }
                if !batch.is_empty() && batch_size + row_size > RESULT_MESSAGE_SOFT_LIMIT {
                    self.flush_batch(&mut schema, &mut batch, &mut batch_size, false)
                        .await;
                }
                batch_size += row_size;
                batch.push(into_row_bundle(row));
                self.metrics.rows_streamed_total.recorder(&[]).inc(1);
            }

            // Free the per-fragment result and reservation before the next fragment (§4.5
            // step 7); `stream` and `reservation` drop here at end of scope.
            drop(stream);
            drop(reservation);
        }

        if !errors.is_empty() {
            let error_result = ResultProto {
                schema: schema.clone(),
                rows: Vec::new(),
                continues: false,
                errormsg: Some(errors.to_string()),
            };
            self.send_message(error_result, true).await;
            task.set_state(TaskState::Failed);
            self.executive.mark_completed(task.job_id, false).await;
            return Ok(());
        }

        self.flush_batch(&mut schema, &mut batch, &mut batch_size, true).await;
        if is_last_task {
            self.channel.transmit_task_last(true);
        }
        task.set_state(TaskState::Finished);
        self.executive.mark_completed(task.job_id, true).await;
        Ok(())
    }

    async fn flush_batch(
        &self,
        schema: &mut Vec<ResultColumnSchema>,
        batch: &mut Vec<RowBundle>,
        batch_size: &mut usize,
        is_final: bool,
    ) {
        if batch.is_empty() && !is_final {
            return;
        }
        let result = ResultProto {
            schema: std::mem::take(schema),
            rows: std::mem::take(batch),
            continues: !is_final,
            errormsg: None,
        };
        *batch_size = 0;
        self.send_message(result, false).await;
    }

    async fn send_message(&self, result: ResultProto, errored: bool) {
        let payload = self.codec.encode_result(&result);
        let header = ProtoHeader {
            protocol: MIN_SUPPORTED_PROTOCOL,
            size: payload.len() as u32,
            md5: protoheader::payload_md5(&payload),
            wname: self.wname.clone(),
            endnodata: errored || !result.continues,
        };
        debug!(bytes = payload.len(), errored, "streaming result message");
        let sent = self
            .channel
            .add_transmit(TransmitData {
                header,
                payload,
                errored,
            })
            .await;
        if !sent {
            warn!("result channel was already dead; message dropped");
        }
    }

    /// Run `task`'s `fragments` the same way [`Self::run`] does, but spool rows through
    /// `row_codec` into `file_channel`'s result file instead of streaming protobuf messages
    /// (§4.4 "File-spool variant"), matching the overview's "streams rows through C1→C4" data
    /// path for the bulk-load case. `stream_buf_cap` bounds each encoder fill, mirroring the
    /// original's stream buffer.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_to_file(
        &self,
        task: &Task,
        fragments: &[Fragment],
        protocol_version: u32,
        file_channel: &FileSpoolChannel,
        dialect: Dialect,
        blob_columns: Vec<bool>,
        stream_buf_cap: usize,
        is_last_task: bool,
    ) -> Result<(), Error> {
        if protocol_version < MIN_SUPPORTED_PROTOCOL {
            return Err(Error::UnsupportedProtocol {
                got: protocol_version,
                min: MIN_SUPPORTED_PROTOCOL,
            });
        }
        if task.is_cancelled() {
            task.set_state(TaskState::Cancelled);
            return Ok(());
        }
        task.set_state(TaskState::Executing);

        let interactive = task.interactive && fragments.len() <= 1;
        let mut admitted = self
            .conn_mgr
            .connect(self.driver.as_ref(), interactive)
            .await
            .context(SqlSnafu)?;
        admitted
            .conn
            .set_user(&format!("qserv_{}", task.czar_id))
            .await
            .context(SqlSnafu)?;

        task.set_state(TaskState::Reading);

        let mut errors = MultiError::new(task.chunk_id);
        let mut encoder = Encoder::new(dialect, blob_columns);

        'fragments: for fragment in fragments {
            if task.is_cancelled() {
                task.set_state(TaskState::Cancelled);
                return Ok(());
            }

            let reservation = if fragment.sub_chunk_ids.is_empty() {
                None
            } else {
                match self
                    .subchunk_mgr
                    .acquire(AcquireRequest {
                        db: &fragment.db,
                        chunk_id: task.chunk_id,
                        tables: &fragment.tables,
                        sub_chunk_ids: &fragment.sub_chunk_ids,
                    })
                    .await
                {
                    Ok(r) => Some(r),
                    Err(err) => {
                        errors.push(Error::Subchunk { source: err });
                        self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                        continue 'fragments;
                    }
                }
            };

            let mut stream = match admitted.conn.query_unbuffered(&fragment.sql).await {
                Ok(stream) => stream,
                Err(err) => {
                    errors.push(Error::Sql { source: err });
                    self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                    drop(reservation);
                    continue 'fragments;
                }
            };

            loop {
                if task.is_cancelled() {
                    task.set_state(TaskState::Cancelled);
                    return Ok(());
                }
                let row = match stream.next_row().await {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(err) => {
                        errors.push(Error::Sql { source: err });
                        self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                        break;
                    }
                };
                if let Err(err) = self
                    .encode_and_spool_row(&mut encoder, row, stream_buf_cap, file_channel)
                    .await
                {
                    errors.push(&err);
                    self.metrics.fragments_failed_total.recorder(&[]).inc(1);
                    break;
                }
                self.metrics.rows_streamed_total.recorder(&[]).inc(1);
            }

            drop(stream);
            drop(reservation);
        }

        let success = errors.is_empty();
        task.set_state(if success { TaskState::Finished } else { TaskState::Failed });
        if is_last_task {
            let header = ProtoHeader {
                protocol: MIN_SUPPORTED_PROTOCOL,
                size: 0,
                md5: [0; 16],
                wname: self.wname.clone(),
                endnodata: true,
            };
            file_channel
                .task_finished(&header)
                .await
                .map_err(|err| Error::Spool { reason: err.to_string() })?;
        }
        self.executive.mark_completed(task.job_id, success).await;
        Ok(())
    }

    async fn encode_and_spool_row(
        &self,
        encoder: &mut Encoder,
        row: SqlRow,
        stream_buf_cap: usize,
        file_channel: &FileSpoolChannel,
    ) -> Result<(), Error> {
        if encoder.is_large_row(&row) || encoder.has_pending_large_row() {
            loop {
                let mut buf = Vec::new();
                let done = encoder
                    .encode_large_row_into(row.clone(), &mut buf, stream_buf_cap)
                    .context(CodecSnafu)?;
                if !buf.is_empty() {
                    file_channel
                        .spool_row(&buf)
                        .await
                        .map_err(|err| Error::Spool { reason: err.to_string() })?;
                }
                if done {
                    return Ok(());
                }
            }
        }
        let mut pending = VecDeque::from([row]);
        let mut buf = Vec::new();
        encoder
            .encode_small_rows_into(&mut pending, &mut buf, stream_buf_cap)
            .context(CodecSnafu)?;
        if !buf.is_empty() {
            file_channel
                .spool_row(&buf)
                .await
                .map_err(|err| Error::Spool { reason: err.to_string() })?;
        }
        Ok(())
    }

    /// Cooperative cancellation (§4.5 "Cancellation"): marks the task cancelled, asks the driver
    /// to cancel whatever is running on `connection_id`, and kills the shared channel so no
    /// further buffered data goes out. All four [`qserv_types::CancelOutcome`]s are logged; none
    /// is treated as fatal.
    pub async fn cancel(&self, task: &Task, connection_id: u64) {
        task.cancel();
        let outcome = self.driver.cancel(connection_id).await;
        info!(?outcome, query_id = task.query_id, "task cancellation requested");
        self.channel.kill();
    }
}

fn into_row_bundle(row: SqlRow) -> RowBundle {
    RowBundle { columns: row.columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qserv_types::{
        CancelOutcome, ChunkId, DbTable, ProtoCodecError, ResultColumnSchema, RowStream, ScTable,
        ScanInfo, SqlConnection, SqlError, SqlRow, TransportError,
    };
    use result_channel::TransmitMgr;
    use serial_test::serial;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use subchunk_mgr::FakeBackend;

    #[derive(Debug, Default)]
    struct NullCodec;
    impl ProtoCodec for NullCodec {
        fn encode_header(&self, _h: &ProtoHeader) -> Vec<u8> {
            vec![1]
        }
        fn decode_header(&self, _b: &[u8]) -> Result<ProtoHeader, ProtoCodecError> {
            unimplemented!()
        }
        fn encode_result(&self, result: &ResultProto) -> Vec<u8> {
            vec![result.rows.len() as u8]
        }
    }

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
        finished: AtomicBool,
    }
    #[async_trait]
    impl qserv_types::Transport for RecordingTransport {
        async fn send(&self, buf: Vec<u8>) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(buf);
            Ok(())
        }
        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    struct FakeRowStream {
        schema: Vec<ResultColumnSchema>,
        rows: VecDeque<SqlRow>,
    }
    #[async_trait]
    impl RowStream for FakeRowStream {
        fn schema(&self) -> &[ResultColumnSchema] {
            &self.schema
        }
        async fn next_row(&mut self) -> Result<Option<SqlRow>, SqlError> {
            Ok(self.rows.pop_front())
        }
    }

    #[derive(Debug)]
    struct FakeConnection {
        rows: VecDeque<SqlRow>,
    }
    #[async_trait]
    impl SqlConnection for FakeConnection {
        fn connection_id(&self) -> u64 {
            1
        }
        async fn set_user(&mut self, _user: &str) -> Result<(), SqlError> {
            Ok(())
        }
        async fn execute(&mut self, _sql: &str) -> Result<(), SqlError> {
            Ok(())
        }
        async fn query_unbuffered(&mut self, _sql: &str) -> Result<Box<dyn RowStream>, SqlError> {
            Ok(Box::new(FakeRowStream {
                schema: vec![ResultColumnSchema {
                    name: "objectId".into(),
                    has_default: false,
                    default_value: None,
                    sql_type: "BIGINT".into(),
                    mysql_type: 8,
                }],
                rows: std::mem::take(&mut self.rows),
            }))
        }
    }

    #[derive(Debug)]
    struct FakeDriver {
        rows: StdMutex<Option<VecDeque<SqlRow>>>,
    }
    #[async_trait]
    impl SqlDriver for FakeDriver {
        async fn connect(&self) -> Result<Box<dyn SqlConnection>, SqlError> {
            let rows = self.rows.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(FakeConnection { rows }))
        }
        async fn cancel(&self, _connection_id: u64) -> CancelOutcome {
            CancelOutcome::Success
        }
    }

    #[derive(Debug, Default)]
    struct FakeExecutive {
        completions: StdMutex<Vec<(u64, bool)>>,
    }
    #[async_trait]
    impl Executive for FakeExecutive {
        async fn mark_completed(&self, job_id: u64, success: bool) {
            self.completions.lock().unwrap().push((job_id, success));
        }
    }

    fn row(v: i64) -> SqlRow {
        SqlRow {
            columns: vec![Some(v.to_be_bytes().to_vec())],
        }
    }

    fn make_task() -> Task {
        Task::new(
            1,
            100,
            7,
            "czar-host",
            4040,
            ChunkId(50),
            vec![],
            ScanInfo::new(vec![]),
            true,
            5_000_000_000,
            0,
        )
    }

    async fn build_runner(
        rows: Vec<SqlRow>,
    ) -> (TaskRunner<FakeBackend>, Arc<RecordingTransport>, Arc<FakeExecutive>) {
        subchunk_mgr::mem_lock::shutdown();
        subchunk_mgr::mem_lock::init().unwrap();
        let registry = metric::Registry::new();
        let backend = Arc::new(FakeBackend::new());
        let subchunk_mgr = SubchunkMgr::new(backend, &registry);
        let conn_mgr = Arc::new(SqlConnMgr::new(Default::default()));
        let driver = Arc::new(FakeDriver {
            rows: StdMutex::new(Some(VecDeque::from(rows))),
        });
        let transport = Arc::new(RecordingTransport::default());
        let transmit_mgr = Arc::new(TransmitMgr::new(Default::default(), &registry));
        let channel = Channel::new(1, Arc::clone(&transport) as Arc<_>, transmit_mgr, 7, &registry);
        let codec: Arc<dyn ProtoCodec> = Arc::new(NullCodec);
        channel.spawn_transmit_loop(Arc::clone(&codec));
        let executive = Arc::new(FakeExecutive::default());
        let runner = TaskRunner::new(
            subchunk_mgr,
            conn_mgr,
            driver,
            channel,
            codec,
            Arc::clone(&executive) as Arc<dyn Executive>,
            "worker-7",
            &registry,
        );
        (runner, transport, executive)
    }

    fn full_chunk_fragment() -> Fragment {
        Fragment {
            db: "LSST".into(),
            sql: "SELECT objectId FROM Object".into(),
            tables: vec!["Object".into()],
            sub_chunk_ids: vec![],
        }
    }

    #[tokio::test]
    #[serial]
    async fn rejects_pre_v2_protocol_before_touching_the_driver() {
        let (runner, _transport, executive) = build_runner(vec![]).await;
        let task = make_task();
        let err = runner.run(&task, &[full_chunk_fragment()], 1, true).await.unwrap_err();
        assert_matches::assert_matches!(err, Error::UnsupportedProtocol { got: 1, min: 2 });
        assert!(executive.completions.lock().unwrap().is_empty());
        subchunk_mgr::mem_lock::shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn successful_run_streams_rows_and_marks_completion() {
        let (runner, transport, executive) = build_runner(vec![row(1), row(2), row(3)]).await;
        let task = make_task();
        runner.run(&task, &[full_chunk_fragment()], 2, true).await.unwrap();
        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(executive.completions.lock().unwrap(), vec![(100, true)]);
        assert!(!transport.sent.lock().unwrap().is_empty());
        subchunk_mgr::mem_lock::shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn oversized_row_fails_the_task_and_sends_an_error_response() {
        let oversize = SqlRow {
            columns: vec![Some(vec![0u8; RESULT_MESSAGE_HARD_LIMIT + 1])],
        };
        let (runner, _transport, executive) = build_runner(vec![oversize]).await;
        let task = make_task();
        runner.run(&task, &[full_chunk_fragment()], 2, true).await.unwrap();
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(executive.completions.lock().unwrap(), vec![(100, false)]);
        subchunk_mgr::mem_lock::shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn cancellation_before_reading_short_circuits_without_completion() {
        let (runner, _transport, executive) = build_runner(vec![row(1)]).await;
        let task = make_task();
        task.set_state(TaskState::Executing);
        task.cancel();
        runner.run(&task, &[full_chunk_fragment()], 2, true).await.unwrap();
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(executive.completions.lock().unwrap().is_empty());
        subchunk_mgr::mem_lock::shutdown();
    }

    #[tokio::test]
    #[serial]
    async fn run_to_file_spools_escaped_rows_and_sends_one_summary() {
        let (runner, transport, executive) =
            build_runner(vec![row(1), row(2)]).await;
        let task = make_task();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.dat");
        let file_channel = result_channel::FileSpoolChannel::create(
            &path,
            1,
            Arc::clone(&transport) as Arc<dyn qserv_types::Transport>,
        )
        .await
        .unwrap();

        runner
            .run_to_file(
                &task,
                &[full_chunk_fragment()],
                2,
                &file_channel,
                row_codec::Dialect::default(),
                vec![false],
                64 * 1024,
                true,
            )
            .await
            .unwrap();

        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(executive.completions.lock().unwrap(), vec![(100, true)]);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert!(!on_disk.is_empty(), "spooled rows must have been written to disk");
        subchunk_mgr::mem_lock::shutdown();
    }
}
