//! Interactive FIFO-of-chunk-groups scheduler (§4.6 "Group scheduler"), grounded on
//! `wsched::GroupScheduler`.

use crate::Scheduler;
use parking_lot::Mutex;
use qserv_types::{ChunkId, Task};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug)]
struct ChunkGroup {
    seq: u64,
    chunk_id: ChunkId,
    tasks: VecDeque<Arc<Task>>,
}

#[derive(Debug, Default)]
struct State {
    groups: VecDeque<ChunkGroup>,
    /// Chunk -> seq of its still-open group, i.e. one that hasn't yet reached `max_per_chunk`
    /// tasks. Once a group is full, further arrivals for that chunk open a fresh group at the
    /// back of the queue rather than rejoining it.
    open: HashMap<ChunkId, u64>,
    next_seq: u64,
    in_flight: usize,
}

/// Batches same-chunk interactive tasks into groups of up to `max_per_chunk`, dequeued group by
/// group in arrival order. A query touching a chunk that's already been grouped gets to ride
/// along instead of going to the back of the whole queue, without letting one popular chunk
/// starve everything behind it indefinitely.
#[derive(Debug)]
pub struct GroupScheduler {
    name: String,
    max_threads: usize,
    min_reserved: usize,
    max_per_chunk: usize,
    priority: i32,
    state: Mutex<State>,
}

impl GroupScheduler {
    /// Construct a new group scheduler. `max_per_chunk` is the original's `maxThreads` cap on a
    /// single chunk group (default 3).
    pub fn new(
        name: impl Into<String>,
        max_threads: usize,
        min_reserved: usize,
        max_per_chunk: usize,
        priority: i32,
    ) -> Arc<Self> {
        assert!(max_per_chunk > 0, "max_per_chunk must be positive");
        Arc::new(Self {
            name: name.into(),
            max_threads,
            min_reserved,
            max_per_chunk,
            priority,
            state: Mutex::new(State::default()),
        })
    }
}

impl Scheduler for GroupScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_task(&self, task: Arc<Task>) {
        let mut state = self.state.lock();
        let chunk_id = task.chunk_id;
        if let Some(&seq) = state.open.get(&chunk_id) {
            let group = state
                .groups
                .iter_mut()
                .find(|g| g.seq == seq)
                .expect("an open group's seq must refer to a live group");
            group.tasks.push_back(task);
            if group.tasks.len() >= self.max_per_chunk {
                state.open.remove(&chunk_id);
            }
        } else {
            let seq = state.next_seq;
            state.next_seq += 1;
            let mut tasks = VecDeque::new();
            tasks.push_back(task);
            let full = tasks.len() >= self.max_per_chunk;
            state.groups.push_back(ChunkGroup {
                seq,
                chunk_id,
                tasks,
            });
            if !full {
                state.open.insert(chunk_id, seq);
            }
        }
    }

    fn ready(&self) -> bool {
        let state = self.state.lock();
        !state.groups.is_empty() && state.in_flight < self.max_threads
    }

    fn get_cmd(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock();
        if state.in_flight >= self.max_threads {
            return None;
        }
        let front = state.groups.front_mut()?;
        let task = front.tasks.pop_front()?;
        let chunk_id = front.chunk_id;
        let seq = front.seq;
        let drained = front.tasks.is_empty();
        if drained {
            state.groups.pop_front();
            if state.open.get(&chunk_id) == Some(&seq) {
                state.open.remove(&chunk_id);
            }
        }
        state.in_flight += 1;
        Some(task)
    }

    fn command_finish(&self, _task: &Arc<Task>) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    fn size(&self) -> usize {
        let state = self.state.lock();
        state.groups.iter().map(|g| g.tasks.len()).sum()
    }

    fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    fn max_threads(&self) -> usize {
        self.max_threads
    }

    fn min_reserved(&self) -> usize {
        self.min_reserved
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn remove_query(&self, query_id: u64) -> Vec<Arc<Task>> {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        let mut kept = VecDeque::new();
        while let Some(mut group) = state.groups.pop_front() {
            let seq = group.seq;
            let chunk_id = group.chunk_id;
            let (stay, leave): (VecDeque<_>, VecDeque<_>) =
                group.tasks.drain(..).partition(|t| t.query_id != query_id);
            removed.extend(leave);
            if stay.is_empty() {
                if state.open.get(&chunk_id) == Some(&seq) {
                    state.open.remove(&chunk_id);
                }
            } else {
                group.tasks = stay;
                kept.push_back(group);
            }
        }
        state.groups = kept;
        removed
    }
}
