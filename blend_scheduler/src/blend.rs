//! Combines the group scheduler and the three scan schedulers under a shared thread-reservation
//! gate (§4.6 "Blend scheduler"), grounded on `wsched::BlendScheduler`.

use crate::{GroupScheduler, ScanScheduler, Scheduler};
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::debug;
use parking_lot::Mutex;
use qserv_types::Task;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct Metrics {
    dispatched_total: Metric<U64Counter>,
    queued_total: Metric<U64Counter>,
}

impl Metrics {
    fn new(registry: &Registry) -> Self {
        Self {
            dispatched_total: registry
                .register_metric("blend_scheduler_dispatched_total", "tasks handed out per sub-scheduler"),
            queued_total: registry
                .register_metric("blend_scheduler_queued_total", "tasks queued per sub-scheduler"),
        }
    }
}

/// Dispatches tasks from a fixed priority order of sub-schedulers — group, then scan-fast,
/// scan-medium, scan-slow — onto a shared worker thread pool.
///
/// A sub-scheduler is only allowed to hand out a task when doing so would still leave the pool
/// with at least as many free threads as the sum of every *other* sub-scheduler's
/// [`Scheduler::min_reserved`], so a flood of slow scans can never starve threads the group
/// scheduler or the faster bands are entitled to.
#[derive(Debug)]
pub struct BlendScheduler {
    name: String,
    total_threads: usize,
    group: Arc<GroupScheduler>,
    scan_fast: Arc<ScanScheduler>,
    scan_medium: Arc<ScanScheduler>,
    scan_slow: Arc<ScanScheduler>,
    order: Vec<Arc<dyn Scheduler>>,
    /// Tracks which sub-scheduler a still-live task was handed to, keyed by `Arc` identity, so
    /// [`Self::command_finish`] and [`Self::move_user_query`] route to the right place even after
    /// a query has been moved between scan bands.
    assigned: Mutex<HashMap<usize, usize>>,
    /// Serializes the whole dispatch decision, mirroring the scheduler-level lock that sits above
    /// each sub-scheduler's own queue lock in the crate's lock ordering.
    lock: Mutex<()>,
    metrics: Metrics,
}

impl BlendScheduler {
    /// Construct a blend scheduler over one group scheduler and three scan schedulers, in the
    /// fixed group/fast/medium/slow dispatch priority.
    pub fn new(
        name: impl Into<String>,
        total_threads: usize,
        group: Arc<GroupScheduler>,
        scan_fast: Arc<ScanScheduler>,
        scan_medium: Arc<ScanScheduler>,
        scan_slow: Arc<ScanScheduler>,
        registry: &Registry,
    ) -> Arc<Self> {
        let order: Vec<Arc<dyn Scheduler>> = vec![
            Arc::clone(&group) as Arc<dyn Scheduler>,
            Arc::clone(&scan_fast) as Arc<dyn Scheduler>,
            Arc::clone(&scan_medium) as Arc<dyn Scheduler>,
            Arc::clone(&scan_slow) as Arc<dyn Scheduler>,
        ];
        Arc::new(Self {
            name: name.into(),
            total_threads,
            group,
            scan_fast,
            scan_medium,
            scan_slow,
            order,
            assigned: Mutex::new(HashMap::new()),
            lock: Mutex::new(()),
            metrics: Metrics::new(registry),
        })
    }

    /// The interactive group scheduler.
    pub fn group(&self) -> &Arc<GroupScheduler> {
        &self.group
    }

    /// The fast-band scan scheduler.
    pub fn scan_fast(&self) -> &Arc<ScanScheduler> {
        &self.scan_fast
    }

    /// The medium-band scan scheduler.
    pub fn scan_medium(&self) -> &Arc<ScanScheduler> {
        &self.scan_medium
    }

    /// The slow-band scan scheduler.
    pub fn scan_slow(&self) -> &Arc<ScanScheduler> {
        &self.scan_slow
    }

    /// Route a task to its sub-scheduler: interactive tasks go to the group scheduler, everything
    /// else goes to the scan band matching its overall scan rating.
    fn route_index(task: &Task) -> usize {
        if task.interactive {
            return 0;
        }
        use qserv_types::ScanRating::*;
        match task.scan_info.rating() {
            Fastest | Fast => 1,
            Medium => 2,
            Slow => 3,
        }
    }

    fn free_threads(&self) -> usize {
        let used: usize = self.order.iter().map(|s| s.in_flight()).sum();
        self.total_threads.saturating_sub(used)
    }

    /// Whether handing one more task out of `order[idx]` would still leave the pool with at least
    /// the sum of every other sub-scheduler's reserved threads.
    fn can_dispatch_from(&self, idx: usize) -> bool {
        let reserved_others: usize = self
            .order
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, s)| s.min_reserved())
            .sum();
        self.free_threads().saturating_sub(1) >= reserved_others
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|s| s.name() == name)
    }

    /// Enqueue a task onto its routed sub-scheduler.
    pub fn queue_task(&self, task: Arc<Task>) {
        let _guard = self.lock.lock();
        let idx = Self::route_index(&task);
        self.assigned
            .lock()
            .insert(Arc::as_ptr(&task) as usize, idx);
        self.metrics
            .queued_total
            .recorder(&[("scheduler", self.order[idx].name())])
            .inc(1);
        self.order[idx].queue_task(task);
    }

    /// Try to dispatch one task, checked against the thread-reservation gate, trying the group
    /// scheduler first, then scan-fast, scan-medium, scan-slow.
    pub fn get_cmd(&self) -> Option<Arc<Task>> {
        let _guard = self.lock.lock();
        for idx in 0..self.order.len() {
            if !self.order[idx].ready() || !self.can_dispatch_from(idx) {
                continue;
            }
            if let Some(task) = self.order[idx].get_cmd() {
                self.metrics
                    .dispatched_total
                    .recorder(&[("scheduler", self.order[idx].name())])
                    .inc(1);
                debug!(scheduler = self.order[idx].name(), query_id = task.query_id, "dispatched task");
                return Some(task);
            }
        }
        None
    }

    /// Record that a previously dispatched task finished, freeing its sub-scheduler's slot.
    pub fn command_finish(&self, task: &Arc<Task>) {
        let _guard = self.lock.lock();
        let idx = self
            .assigned
            .lock()
            .remove(&(Arc::as_ptr(task) as usize))
            .unwrap_or_else(|| Self::route_index(task));
        self.order[idx].command_finish(task);
    }

    /// Move every not-yet-dispatched task of `query_id` from `from` to `to`. Used both by the
    /// boot policy (typically fast to slow) and by an explicit admin request.
    pub fn move_user_query(
        &self,
        query_id: u64,
        from: &Arc<ScanScheduler>,
        to: &Arc<ScanScheduler>,
    ) -> usize {
        let _guard = self.lock.lock();
        let moved = from.remove_query(query_id);
        let count = moved.len();
        let to_idx = self.index_of(to.name());
        for task in moved {
            if let Some(idx) = to_idx {
                self.assigned.lock().insert(Arc::as_ptr(&task) as usize, idx);
            }
            to.queue_task(task);
        }
        count
    }

    /// Total threads this pool is configured with.
    pub fn total_threads(&self) -> usize {
        self.total_threads
    }

    /// The configured name, mostly for logging.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qserv_types::{ChunkId, ScanInfo, ScanRating, ScanTableInfo};

    fn interactive_task(query_id: u64, chunk_id: i64) -> Arc<Task> {
        Arc::new(Task::new(
            query_id,
            query_id,
            1,
            "czar",
            5012,
            ChunkId(chunk_id),
            vec![],
            ScanInfo::new(vec![]),
            true,
            0,
            0,
        ))
    }

    fn scan_task(query_id: u64, chunk_id: i64, rating: ScanRating) -> Arc<Task> {
        Arc::new(Task::new(
            query_id,
            query_id,
            1,
            "czar",
            5012,
            ChunkId(chunk_id),
            vec![],
            ScanInfo::new(vec![ScanTableInfo::new("db", "t", false, rating)]),
            false,
            0,
            0,
        ))
    }

    fn make_blend(total_threads: usize) -> Arc<BlendScheduler> {
        let registry = Registry::new();
        let group = GroupScheduler::new("group", total_threads, 1, 3, 0);
        let scan_fast = ScanScheduler::new("scanFast", total_threads, 1, 1);
        let scan_medium = ScanScheduler::new("scanMed", total_threads, 1, 2);
        let scan_slow = ScanScheduler::new("scanSlow", total_threads, 1, 3);
        BlendScheduler::new("blend", total_threads, group, scan_fast, scan_medium, scan_slow, &registry)
    }

    #[test]
    fn dispatches_group_before_scan_bands() {
        let blend = make_blend(10);
        blend.queue_task(scan_task(1, 1, ScanRating::Slow));
        blend.queue_task(interactive_task(2, 1));

        let first = blend.get_cmd().unwrap();
        assert_eq!(first.query_id, 2, "interactive task must be served before the scan task");
        blend.command_finish(&first);
        let second = blend.get_cmd().unwrap();
        assert_eq!(second.query_id, 1);
    }

    #[test]
    fn thread_reservation_blocks_a_scheduler_from_exhausting_the_pool() {
        // Only 2 total threads; scanFast and scanSlow each reserve 1, so scanFast cannot take the
        // second thread without leaving scanSlow's reservation unmet.
        let registry = Registry::new();
        let group = GroupScheduler::new("group", 2, 0, 3, 0);
        let scan_fast = ScanScheduler::new("scanFast", 2, 1, 1);
        let scan_medium = ScanScheduler::new("scanMed", 2, 0, 2);
        let scan_slow = ScanScheduler::new("scanSlow", 2, 1, 3);
        let blend = BlendScheduler::new("blend", 2, group, scan_fast, scan_medium, scan_slow, &registry);

        blend.queue_task(scan_task(1, 1, ScanRating::Fast));
        blend.queue_task(scan_task(2, 2, ScanRating::Fast));

        let first = blend.get_cmd();
        assert!(first.is_some());
        let second = blend.get_cmd();
        assert!(
            second.is_none(),
            "handing out a second fast task would leave no free thread for scanSlow's reservation"
        );
    }

    #[test]
    fn move_user_query_transplants_queued_tasks_between_scan_bands() {
        let blend = make_blend(10);
        blend.queue_task(scan_task(7, 1, ScanRating::Fast));
        blend.queue_task(scan_task(7, 2, ScanRating::Fast));

        let moved = blend.move_user_query(7, blend.scan_fast(), blend.scan_slow());
        assert_eq!(moved, 2);
        assert_eq!(blend.scan_fast().size(), 0);
        assert_eq!(blend.scan_slow().size(), 2);

        let task = blend.get_cmd().unwrap();
        assert_eq!(task.query_id, 7);
        blend.command_finish(&task);
        assert_eq!(blend.scan_slow().in_flight(), 0);
    }
}
