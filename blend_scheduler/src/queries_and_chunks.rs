//! Per-`(query, chunk)` baseline-runtime tracking and boot-policy demotion (§4.6 "Boot policy"),
//! grounded on `wpublish::QueriesAndChunks` (behavior cross-checked against
//! `wsched/testSchedulers.cc`).
//!
//! A chunk's baseline is the runtime of the first task that finished on it. [`Self::examine_all`]
//! is a periodic sweep: any still-running task on the fast scan band whose elapsed time exceeds
//! its chunk's baseline by a configured multiplier gets its query "booted" — the query's other
//! queued fast-band tasks are migrated to the slow band via
//! [`crate::BlendScheduler::move_user_query`], freeing the fast lanes for everyone else.

use crate::{BlendScheduler, ScanScheduler, Scheduler};
use iox_time::Time;
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::info;
use parking_lot::Mutex;
use qserv_types::{ChunkId, Task};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the boot policy. Defaults match the original's `maxBooted`/`maxDarkTasks`
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct QueriesAndChunksConfig {
    /// How many times a chunk's baseline runtime a task may exceed before it is booted.
    pub boot_multiplier: u32,
    /// Once a query has this many booted tasks, further over-baseline tasks for it are left
    /// alone: demotion already happened, no need to keep moving the goalposts.
    pub max_booted: usize,
    /// Once a query has this many "dark" tasks (running on a chunk with no established baseline
    /// yet, so there is nothing to compare against), no more of its tasks are counted as dark —
    /// this just bounds the bookkeeping, it does not refuse to run them.
    pub max_dark_tasks: usize,
}

impl Default for QueriesAndChunksConfig {
    fn default() -> Self {
        Self {
            boot_multiplier: 100,
            max_booted: 5,
            max_dark_tasks: 25,
        }
    }
}

/// Per-query boot-policy counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStatistics {
    /// How many of this query's tasks have been booted (moved fast-to-slow) so far.
    pub tasks_booted: usize,
    /// How many of this query's currently-running tasks are on a chunk with no baseline yet.
    pub tasks_dark: usize,
}

#[derive(Debug)]
struct RunningTask {
    query_id: u64,
    chunk_id: ChunkId,
    scheduler: String,
    start: Time,
    counted_dark: bool,
}

#[derive(Debug, Default)]
struct Metrics {
    booted_total: Option<Metric<U64Counter>>,
}

/// Registry of per-chunk baseline runtimes and per-query boot-policy counters.
#[derive(Debug)]
pub struct QueriesAndChunks {
    config: QueriesAndChunksConfig,
    baselines: Mutex<HashMap<ChunkId, Duration>>,
    running: Mutex<HashMap<usize, RunningTask>>,
    stats: Mutex<HashMap<u64, QueryStatistics>>,
    metrics: Mutex<Metrics>,
}

impl QueriesAndChunks {
    /// Construct a new, empty registry.
    pub fn new(config: QueriesAndChunksConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            baselines: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            metrics: Mutex::new(Metrics::default()),
        })
    }

    /// Register metrics with `registry`. Optional: a registry created with [`Self::new`] alone
    /// still functions, it just doesn't publish `scheduler_booted_total`.
    pub fn with_metrics(self: &Arc<Self>, registry: &Registry) {
        self.metrics.lock().booted_total = Some(
            registry.register_metric("blend_scheduler_booted_total", "queries demoted by the boot policy"),
        );
    }

    /// Record that `task` started running on `scheduler_name` at `now`. Tasks on a chunk with no
    /// established baseline yet are counted as this query's "dark" tasks, up to the configured
    /// cap.
    pub fn track_task_start(&self, task: &Arc<Task>, scheduler_name: &str, now: Time) {
        let has_baseline = self.baselines.lock().contains_key(&task.chunk_id);
        let mut counted_dark = false;
        if !has_baseline {
            let mut stats = self.stats.lock();
            let entry = stats.entry(task.query_id).or_default();
            if entry.tasks_dark < self.config.max_dark_tasks {
                entry.tasks_dark += 1;
                counted_dark = true;
            }
        }
        self.running.lock().insert(
            Arc::as_ptr(task) as usize,
            RunningTask {
                query_id: task.query_id,
                chunk_id: task.chunk_id,
                scheduler: scheduler_name.to_string(),
                start: now,
                counted_dark,
            },
        );
    }

    /// Record that `task` finished at `now`. If its chunk has no baseline yet, this task's
    /// runtime becomes the baseline (the original's "first N=1 completed baseline tasks").
    pub fn track_task_finish(&self, task: &Arc<Task>, now: Time) {
        let Some(running) = self.running.lock().remove(&(Arc::as_ptr(task) as usize)) else {
            return;
        };
        if running.counted_dark {
            if let Some(stats) = self.stats.lock().get_mut(&running.query_id) {
                stats.tasks_dark = stats.tasks_dark.saturating_sub(1);
            }
        }
        let elapsed = now.checked_duration_since(running.start);
        self.baselines.lock().entry(running.chunk_id).or_insert(elapsed);
    }

    /// This query's current boot-policy counters, or the zero value if it has none tracked.
    pub fn query_statistics(&self, query_id: u64) -> QueryStatistics {
        self.stats.lock().get(&query_id).copied().unwrap_or_default()
    }

    /// A chunk's established baseline runtime, if one has been observed yet.
    pub fn baseline_for(&self, chunk_id: ChunkId) -> Option<Duration> {
        self.baselines.lock().get(&chunk_id).copied()
    }

    /// Periodic sweep (§4.6 "Boot policy"): any task still running on `fast` whose elapsed time
    /// exceeds its chunk's baseline by [`QueriesAndChunksConfig::boot_multiplier`] gets its query
    /// booted, up to [`QueriesAndChunksConfig::max_booted`] bootings per query. A booted query has
    /// every one of its still-queued `fast` tasks moved to `slow` via
    /// [`BlendScheduler::move_user_query`]. Returns the number of tasks newly marked booted.
    pub fn examine_all(
        &self,
        now: Time,
        blend: &BlendScheduler,
        fast: &Arc<ScanScheduler>,
        slow: &Arc<ScanScheduler>,
    ) -> usize {
        let mut newly_booted_queries: Vec<u64> = Vec::new();
        {
            let running = self.running.lock();
            let baselines = self.baselines.lock();
            let mut stats = self.stats.lock();
            for task in running.values() {
                if task.scheduler != fast.name() {
                    continue;
                }
                let Some(&baseline) = baselines.get(&task.chunk_id) else {
                    continue;
                };
                let elapsed = now.checked_duration_since(task.start);
                if elapsed <= baseline.saturating_mul(self.config.boot_multiplier) {
                    continue;
                }
                let entry = stats.entry(task.query_id).or_default();
                if entry.tasks_booted >= self.config.max_booted {
                    continue;
                }
                entry.tasks_booted += 1;
                newly_booted_queries.push(task.query_id);
            }
        }

        let booted = newly_booted_queries.len();
        let mut already_moved = std::collections::HashSet::new();
        for query_id in newly_booted_queries {
            if !already_moved.insert(query_id) {
                continue;
            }
            let moved = blend.move_user_query(query_id, fast, slow);
            info!(query_id, moved, from = fast.name(), to = slow.name(), "query booted to slower scan band");
            if let Some(metric) = &self.metrics.lock().booted_total {
                metric.recorder(&[("from", fast.name())]).inc(1);
            }
        }
        booted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GroupScheduler;
    use qserv_types::{ScanInfo, ScanRating, ScanTableInfo};
    use std::time::Duration;

    fn scan_task(query_id: u64, chunk_id: i64) -> Arc<Task> {
        Arc::new(Task::new(
            query_id,
            query_id,
            1,
            "czar",
            5012,
            ChunkId(chunk_id),
            vec![],
            ScanInfo::new(vec![ScanTableInfo::new("db", "t", false, ScanRating::Fast)]),
            false,
            0,
            0,
        ))
    }

    fn make_blend(total_threads: usize) -> (Arc<BlendScheduler>, Arc<ScanScheduler>, Arc<ScanScheduler>) {
        let registry = Registry::new();
        let group = GroupScheduler::new("group", total_threads, 1, 3, 0);
        let scan_fast = ScanScheduler::new("scanFast", total_threads, 1, 1);
        let scan_medium = ScanScheduler::new("scanMed", total_threads, 1, 2);
        let scan_slow = ScanScheduler::new("scanSlow", total_threads, 1, 3);
        let blend = BlendScheduler::new(
            "blend",
            total_threads,
            group,
            Arc::clone(&scan_fast),
            scan_medium,
            Arc::clone(&scan_slow),
            &registry,
        );
        (blend, scan_fast, scan_slow)
    }

    #[test]
    fn booted_query_demotion_matches_scenario_5() {
        // QID A completes one task on chunk 10 in 1ms, establishing the baseline.
        let qac = QueriesAndChunks::new(QueriesAndChunksConfig::default());
        let start = Time::from_timestamp(0);
        let task_a = scan_task(1, 10);
        qac.track_task_start(&task_a, "scanFast", start);
        qac.track_task_finish(&task_a, start + Duration::from_millis(1));
        assert_eq!(qac.baseline_for(ChunkId(10)), Some(Duration::from_millis(1)));

        // QID B's task on the same chunk is still running 1s later: 1000x the 1ms baseline, well
        // past the default 100x multiplier.
        let (blend, fast, slow) = make_blend(10);
        let task_b = scan_task(2, 10);
        blend.queue_task(Arc::clone(&task_b));
        let dispatched = blend.get_cmd().unwrap();
        assert_eq!(dispatched.query_id, 2);
        qac.track_task_start(&task_b, "scanFast", start);

        let booted = qac.examine_all(start + Duration::from_secs(1), &blend, &fast, &slow);
        assert_eq!(booted, 1);
        assert_eq!(qac.query_statistics(2).tasks_booted, 1);
        assert_eq!(qac.query_statistics(1).tasks_booted, 0, "QID A must be untouched");
    }

    #[test]
    fn queued_tasks_of_a_booted_query_move_from_fast_to_slow() {
        let qac = QueriesAndChunks::new(QueriesAndChunksConfig::default());
        let start = Time::from_timestamp(0);
        let baseline_task = scan_task(1, 7);
        qac.track_task_start(&baseline_task, "scanFast", start);
        qac.track_task_finish(&baseline_task, start + Duration::from_millis(1));

        let (blend, fast, slow) = make_blend(10);
        // One task of QID 2 is already dispatched (tracked as running); another is still queued
        // on the fast scheduler and should migrate when QID 2 gets booted.
        let running_task = scan_task(2, 7);
        let queued_task = scan_task(2, 7);
        blend.queue_task(Arc::clone(&queued_task));
        qac.track_task_start(&running_task, "scanFast", start);

        assert_eq!(fast.size(), 1);
        let booted = qac.examine_all(start + Duration::from_secs(1), &blend, &fast, &slow);
        assert_eq!(booted, 1);
        assert_eq!(fast.size(), 0);
        assert_eq!(slow.size(), 1);
    }

    #[test]
    fn max_booted_caps_further_demotions_for_the_same_query() {
        let mut config = QueriesAndChunksConfig::default();
        config.max_booted = 1;
        let qac = QueriesAndChunks::new(config);
        let start = Time::from_timestamp(0);
        let baseline_task = scan_task(1, 3);
        qac.track_task_start(&baseline_task, "scanFast", start);
        qac.track_task_finish(&baseline_task, start + Duration::from_millis(1));

        let (blend, fast, slow) = make_blend(10);
        let first = scan_task(9, 3);
        let second = scan_task(9, 3);
        qac.track_task_start(&first, "scanFast", start);
        qac.track_task_start(&second, "scanFast", start);

        let later = start + Duration::from_secs(1);
        let first_pass = qac.examine_all(later, &blend, &fast, &slow);
        assert_eq!(first_pass, 1, "only one booting allowed once max_booted is reached");
        assert_eq!(qac.query_statistics(9).tasks_booted, 1);

        let second_pass = qac.examine_all(later, &blend, &fast, &slow);
        assert_eq!(second_pass, 0, "query is already at its cap");
    }

    #[test]
    fn dark_task_counter_tracks_chunks_with_no_baseline_yet() {
        let qac = QueriesAndChunks::new(QueriesAndChunksConfig::default());
        let start = Time::from_timestamp(0);
        let task = scan_task(5, 42);
        qac.track_task_start(&task, "scanFast", start);
        assert_eq!(qac.query_statistics(5).tasks_dark, 1, "chunk 42 has no baseline yet");

        qac.track_task_finish(&task, start + Duration::from_millis(2));
        assert_eq!(qac.query_statistics(5).tasks_dark, 0, "finishing clears the dark counter");
        assert_eq!(qac.baseline_for(ChunkId(42)), Some(Duration::from_millis(2)));
    }
}
