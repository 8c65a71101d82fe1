//! One slowness-band scan scheduler (§4.6 "Scan schedulers"), grounded on
//! `wsched::ScanScheduler`.

use crate::chunk_tasks::{ChunkTasks, HeapEntry};
use crate::Scheduler;
use parking_lot::Mutex;
use qserv_types::{ChunkId, Task};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct State {
    /// The chunk currently being drained, and every other chunk at or past it in id order.
    active: BTreeMap<ChunkId, ChunkTasks>,
    /// Chunks queued behind the active set, promoted to active once it empties.
    pending: BTreeMap<ChunkId, ChunkTasks>,
    next_seq: u64,
    in_flight: usize,
}

/// Serves tasks chunk by chunk in ascending chunk-id order, slowest table first within a chunk.
///
/// New tasks join `active` if the active set is non-empty and their chunk is at or past the
/// current chunk (`active`'s first key); otherwise they join `pending`. Once `active` drains to
/// empty, the next [`Scheduler::ready`] or [`Scheduler::get_cmd`] call swaps `active` and
/// `pending`, promoting the next batch and establishing a new "current" chunk from its smallest
/// key. This mirrors the original's active/pending heap swap instead of tracking a current-chunk
/// cursor directly.
#[derive(Debug)]
pub struct ScanScheduler {
    name: String,
    max_threads: usize,
    min_reserved: usize,
    priority: i32,
    state: Mutex<State>,
}

impl ScanScheduler {
    /// Construct a new scan scheduler for one slowness band.
    pub fn new(name: impl Into<String>, max_threads: usize, min_reserved: usize, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            max_threads,
            min_reserved,
            priority,
            state: Mutex::new(State::default()),
        })
    }

    fn promote_if_drained(state: &mut State) {
        if state.active.is_empty() && !state.pending.is_empty() {
            std::mem::swap(&mut state.active, &mut state.pending);
        }
    }
}

impl Scheduler for ScanScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_task(&self, task: Arc<Task>) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let chunk_id = task.chunk_id;
        let goes_active = match state.active.keys().next() {
            None => false,
            Some(&current) => chunk_id >= current,
        };
        let entry = HeapEntry { seq, task };
        let map = if goes_active {
            &mut state.active
        } else {
            &mut state.pending
        };
        map.entry(chunk_id).or_insert_with(ChunkTasks::new).heap.push(entry);
    }

    fn ready(&self) -> bool {
        let mut state = self.state.lock();
        Self::promote_if_drained(&mut state);
        !state.active.is_empty() && state.in_flight < self.max_threads
    }

    fn get_cmd(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock();
        Self::promote_if_drained(&mut state);
        if state.in_flight >= self.max_threads {
            return None;
        }
        let chunk_id = *state.active.keys().next()?;
        let chunk_tasks = state.active.get_mut(&chunk_id)?;
        let entry = chunk_tasks.heap.pop()?;
        if chunk_tasks.heap.is_empty() {
            state.active.remove(&chunk_id);
        }
        state.in_flight += 1;
        Some(entry.task)
    }

    fn command_finish(&self, _task: &Arc<Task>) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    fn size(&self) -> usize {
        let state = self.state.lock();
        let active: usize = state.active.values().map(|c| c.heap.len()).sum();
        let pending: usize = state.pending.values().map(|c| c.heap.len()).sum();
        active + pending
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
        let State { active, pending, .. } = &mut *state;
        for map in [active, pending] {
            let chunk_ids: Vec<ChunkId> = map.keys().copied().collect();
            for chunk_id in chunk_ids {
                let chunk_tasks = map.get_mut(&chunk_id).expect("key just collected from this map");
                let drained: Vec<HeapEntry> = chunk_tasks.heap.drain().collect();
                let mut kept = std::collections::BinaryHeap::new();
                for entry in drained {
                    if entry.task.query_id == query_id {
                        removed.push(entry.task);
                    } else {
                        kept.push(entry);
                    }
                }
                if kept.is_empty() {
                    map.remove(&chunk_id);
                } else {
                    chunk_tasks.heap = kept;
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qserv_types::{ScanInfo, ScanRating, ScanTableInfo};

    fn task(query_id: u64, chunk_id: i64, table: &str, rating: ScanRating) -> Arc<Task> {
        let scan_info = ScanInfo::new(vec![ScanTableInfo::new("db", table, false, rating)]);
        Arc::new(Task::new(
            query_id,
            query_id,
            1,
            "czar",
            5012,
            ChunkId(chunk_id),
            vec![],
            scan_info,
            false,
            0,
            0,
        ))
    }

    #[test]
    fn within_a_chunk_tasks_come_out_slowest_table_first() {
        let sched = ScanScheduler::new("fast", 100, 0, 0);
        sched.queue_task(task(1, 10, "charlie", ScanRating::Medium));
        sched.queue_task(task(2, 10, "delta", ScanRating::Medium));
        sched.queue_task(task(3, 10, "bravo", ScanRating::Slow));
        sched.queue_task(task(4, 10, "alpha", ScanRating::Fast));

        let mut order = Vec::new();
        while let Some(t) = sched.get_cmd() {
            order.push(t.scan_info.info_tables[0].table.clone());
            sched.command_finish(&t);
        }
        assert_eq!(order, vec!["bravo", "delta", "charlie", "alpha"]);
    }

    #[test]
    fn chunks_drain_in_ascending_id_order_across_active_pending_swap() {
        let sched = ScanScheduler::new("fast", 100, 0, 0);
        // First arrival goes to pending since active starts empty.
        sched.queue_task(task(1, 20, "t", ScanRating::Fast));
        sched.queue_task(task(2, 5, "t", ScanRating::Fast));

        let first = sched.get_cmd().unwrap();
        assert_eq!(first.chunk_id, ChunkId(5));
        sched.command_finish(&first);
        let second = sched.get_cmd().unwrap();
        assert_eq!(second.chunk_id, ChunkId(20));
        sched.command_finish(&second);
        assert!(sched.get_cmd().is_none());
    }

    #[test]
    fn remove_query_extracts_only_that_querys_queued_tasks() {
        let sched = ScanScheduler::new("fast", 100, 0, 0);
        sched.queue_task(task(1, 5, "a", ScanRating::Fast));
        sched.queue_task(task(2, 5, "b", ScanRating::Fast));
        sched.queue_task(task(1, 9, "c", ScanRating::Fast));

        let removed = sched.remove_query(1);
        assert_eq!(removed.len(), 2);
        assert_eq!(sched.size(), 1);
        let remaining = sched.get_cmd().unwrap();
        assert_eq!(remaining.query_id, 2);
    }
}
