//! The per-chunk max-heap a [`crate::ScanScheduler`] keeps inside its active and pending chunk
//! maps, ordering tasks slowest-table-first (§4.6 "Scan schedulers"), grounded on
//! `wsched::ScanScheduler`'s chunk-disk priority queue.

use qserv_types::Task;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// A task plus its insertion sequence, so tasks with an identical scan rating and slowest-table
/// name still come out in arrival order instead of arbitrarily.
#[derive(Debug)]
pub(crate) struct HeapEntry {
    pub(crate) seq: u64,
    pub(crate) task: Arc<Task>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let a_rating = self.task.scan_info.rating();
        let b_rating = other.task.scan_info.rating();
        a_rating
            .cmp(&b_rating)
            .then_with(|| {
                let a_name = self.task.scan_info.slowest_table_name().unwrap_or("");
                let b_name = other.task.scan_info.slowest_table_name().unwrap_or("");
                // Among equally rated tasks, the alphabetically later table name must compare as
                // the greater heap entry, so it pops first (§8 scenario 2: delta before charlie).
                a_name.cmp(b_name)
            })
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// One chunk's queued tasks, ordered slowest-table-first.
#[derive(Debug)]
pub(crate) struct ChunkTasks {
    pub(crate) heap: BinaryHeap<HeapEntry>,
}

impl ChunkTasks {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }
}
