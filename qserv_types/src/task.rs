use crate::{ChunkId, ScanInfo, SubChunkId};
use std::sync::atomic::{AtomicBool, Ordering};

/// The wire protocol version this core accepts. Anything lower fails with
/// `UnsupportedProtocol`.
pub const MIN_SUPPORTED_PROTOCOL: u32 = 2;

/// A task's lifecycle state. Transitions strictly forward:
/// `Queued -> Executing -> Reading -> {Finished, Cancelled, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Sitting in a scheduler queue, not yet dispatched to a worker thread.
    Queued,
    /// Dispatched; the task runner is preparing the connection and subchunk reservation.
    Executing,
    /// The query is running and rows are being pulled and streamed.
    Reading,
    /// Completed successfully; all rows streamed.
    Finished,
    /// Cancelled cooperatively, either individually or via a query-wide squash.
    Cancelled,
    /// Failed with an unrecoverable error.
    Failed,
}

/// One SQL fragment addressed to one chunk (optionally a set of subchunks), grounded on
/// `wbase::Task` and the `UberJobData` envelope it is dispatched with in the original source.
#[derive(Debug)]
pub struct Task {
    /// Identifier of the overarching user query.
    pub query_id: u64,
    /// Identifier of the job (one user query may fan out into several jobs/uberjobs).
    pub job_id: u64,
    /// How many times this fragment has been (re)attempted.
    pub attempt_count: u32,
    /// The czar process that dispatched this task; replies are addressed back to it.
    pub czar_id: u32,
    /// Hostname of the dispatching czar, carried so the result channel can address its reply
    /// without a second round trip to look it up (supplements spec.md from `UberJobData.h`).
    pub czar_host: String,
    /// Port of the dispatching czar.
    pub czar_port: u16,
    /// The chunk this fragment targets.
    pub chunk_id: ChunkId,
    /// The subchunks this fragment targets, empty for a full-chunk fragment.
    pub sub_chunk_ids: Vec<SubChunkId>,
    /// The tables this fragment scans and their ratings.
    pub scan_info: ScanInfo,
    /// True for a short, first-touch interactive query; false for a shared scan.
    pub interactive: bool,
    /// Soft ceiling (bytes) on the size of any single materialized result table.
    pub max_table_size_bytes: u64,
    /// Maximum row count the czar wants back, 0 meaning unlimited (from `UberJobData.h`).
    pub row_limit: u64,
    cancelled: AtomicBool,
    state: std::sync::Mutex<TaskState>,
}

impl Task {
    /// Construct a new, queued task.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        query_id: u64,
        job_id: u64,
        czar_id: u32,
        czar_host: impl Into<String>,
        czar_port: u16,
        chunk_id: ChunkId,
        sub_chunk_ids: Vec<SubChunkId>,
        scan_info: ScanInfo,
        interactive: bool,
        max_table_size_bytes: u64,
        row_limit: u64,
    ) -> Self {
        Self {
            query_id,
            job_id,
            attempt_count: 0,
            czar_id,
            czar_host: czar_host.into(),
            czar_port,
            chunk_id,
            sub_chunk_ids,
            scan_info,
            interactive,
            max_table_size_bytes,
            row_limit,
            cancelled: AtomicBool::new(false),
            state: std::sync::Mutex::new(TaskState::Queued),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> TaskState {
        *self.state.lock().expect("task state mutex poisoned")
    }

    /// Advance the task's state. Panics on a backward or skipped transition, since that would
    /// indicate a scheduling bug rather than a recoverable error.
    pub fn set_state(&self, next: TaskState) {
        let mut state = self.state.lock().expect("task state mutex poisoned");
        let valid = matches!(
            (*state, next),
            (TaskState::Queued, TaskState::Executing)
                | (TaskState::Executing, TaskState::Reading)
                | (TaskState::Executing, TaskState::Cancelled)
                | (TaskState::Executing, TaskState::Failed)
                | (TaskState::Reading, TaskState::Finished)
                | (TaskState::Reading, TaskState::Cancelled)
                | (TaskState::Reading, TaskState::Failed)
                | (_, TaskState::Cancelled) // cancellation may arrive at any point
        );
        assert!(
            valid,
            "invalid task state transition {:?} -> {:?}",
            *state, next
        );
        *state = next;
    }

    /// Mark the task cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // A task already past Reading has nothing left to cancel cooperatively, but recording
        // the flag is still safe and matches "cancel on a finished task is a no-op".
        let mut state = self.state.lock().expect("task state mutex poisoned");
        if !matches!(*state, TaskState::Finished | TaskState::Failed) {
            *state = TaskState::Cancelled;
        }
    }

    /// Whether [`Self::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScanTableInfo;

    fn make_task() -> Task {
        Task::new(
            1,
            1,
            11,
            "czar-host",
            3333,
            ChunkId(50),
            vec![],
            ScanInfo::new(vec![ScanTableInfo::new(
                "moose",
                "Object",
                true,
                crate::ScanRating::Fast,
            )]),
            false,
            5_000_000_000,
            0,
        )
    }

    #[test]
    fn cancel_is_idempotent() {
        let task = make_task();
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[test]
    fn cancel_on_a_finished_task_does_not_revert_its_state() {
        let task = make_task();
        task.set_state(TaskState::Executing);
        task.set_state(TaskState::Reading);
        task.set_state(TaskState::Finished);
        task.cancel();
        assert_eq!(task.state(), TaskState::Finished);
        assert!(task.is_cancelled());
    }

    #[test]
    #[should_panic(expected = "invalid task state transition")]
    fn skipping_a_state_panics() {
        let task = make_task();
        task.set_state(TaskState::Finished);
    }
}
