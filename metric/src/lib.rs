//! A small metric registration and recording facade.
//!
//! Components register a named [`Metric`] once and then pull out a cheap, clonable recorder
//! for each distinct label set they emit (e.g. one [`U64Counter`] per scheduler name, one per
//! persist-trigger kind). This mirrors the call pattern used throughout the scheduler and
//! persistence crates: `registry.register_metric(name, description)` followed by
//! `metric.recorder(&[("label", "value")])`.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};

/// A set of `(name, value)` label pairs identifying one recorder within a metric.
pub type Attributes = Vec<(&'static str, String)>;

fn attributes_key(attrs: &[(&'static str, String)]) -> String {
    let mut pairs: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(",")
}

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct U64Counter(AtomicU64);

impl U64Counter {
    /// Increment the counter by `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Read the current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A value that can go up or down, such as queue depth or refcount gauges.
#[derive(Debug, Default)]
pub struct I64Gauge(AtomicI64);

impl I64Gauge {
    /// Set the gauge to an absolute value.
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Add (or subtract, for negative `delta`) from the gauge.
    pub fn inc(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Read the current value.
    pub fn fetch(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Anything that [`Metric`] can hand out a fresh recorder instance of.
pub trait MetricKind: Default + Debug + Send + Sync + 'static {}
impl<T> MetricKind for T where T: Default + Debug + Send + Sync + 'static {}

/// A named, described metric. Individual label combinations are recorded via
/// [`Metric::recorder`], which allocates the underlying counter/gauge lazily and caches it.
#[derive(Debug)]
pub struct Metric<T: MetricKind> {
    name: &'static str,
    recorders: Arc<Mutex<BTreeMap<String, Arc<T>>>>,
}

impl<T: MetricKind> Metric<T> {
    /// Return the recorder for the given attribute set, creating it if this is the first time
    /// these attributes have been seen.
    pub fn recorder(&self, attributes: &[(&'static str, &str)]) -> Arc<T> {
        let owned: Vec<(&'static str, String)> = attributes
            .iter()
            .map(|(k, v)| (*k, (*v).to_string()))
            .collect();
        let key = attributes_key(&owned);
        let mut recorders = self.recorders.lock();
        Arc::clone(recorders.entry(key).or_insert_with(|| Arc::new(T::default())))
    }

    /// The metric's registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Default)]
struct RegisteredMetric {
    description: &'static str,
}

/// A process-wide collection of registered metrics. One `Registry` is shared (via `Arc`) across
/// the subchunk manager, the result channel's transmit manager, the blend scheduler, and the
/// replica store, the same way `Arc<metric::Registry>` threads through the teacher's
/// `LifecycleManager::new`.
#[derive(Debug, Default)]
pub struct Registry {
    known: Mutex<BTreeMap<&'static str, RegisteredMetric>>,
}

impl Registry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-fetch) a named metric of kind `T`.
    pub fn register_metric<T: MetricKind>(&self, name: &'static str, description: &'static str) -> Metric<T> {
        self.known
            .lock()
            .entry(name)
            .or_insert(RegisteredMetric { description });
        Metric {
            name,
            recorders: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}
