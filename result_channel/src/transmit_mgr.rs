//! Global transmit concurrency metering (§4.4 "Transmit concurrency").
//!
//! One [`TransmitMgr`] is shared across every channel on a worker. It doles out admission slots
//! split between interactive and large-scan traffic (mirroring `task_runner::SqlConnMgr`'s
//! reserved-pool shape, here reused for outbound transmits instead of connections) and caps how
//! many of those slots any single czar may hold at once, so one runaway czar cannot starve the
//! others.

use metric::{I64Gauge, Metric, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use tracker::{AsyncSemaphore, SemaphorePermit};

/// Configuration for a [`TransmitMgr`].
#[derive(Debug, Clone, Copy)]
pub struct TransmitMgrConfig {
    /// Total concurrent outbound transmits across all traffic.
    pub total: usize,
    /// Of `total`, how many are reserved for interactive/errored/cancelled traffic.
    pub interactive_reserved: usize,
    /// Maximum number of the total slots any single czar may hold concurrently.
    pub per_czar_cap: usize,
}

impl Default for TransmitMgrConfig {
    fn default() -> Self {
        Self {
            total: 32,
            interactive_reserved: 8,
            per_czar_cap: 8,
        }
    }
}

#[derive(Debug)]
struct Metrics {
    in_flight: Metric<I64Gauge>,
}

/// A held transmit admission slot, RAII: dropping it frees both the global slot and this czar's
/// per-czar accounting. Always acquired outside any channel mutex (§5 lock ordering).
#[derive(Debug)]
pub struct TransmitPermit {
    _global: SemaphorePermit,
    czar_id: u32,
    mgr: Arc<CzarAccounting>,
    in_flight_gauge: Arc<I64Gauge>,
}

impl Drop for TransmitPermit {
    fn drop(&mut self) {
        self.mgr.release(self.czar_id);
        self.in_flight_gauge.inc(-1);
    }
}

#[derive(Debug)]
struct CzarAccounting {
    per_czar_cap: usize,
    in_flight: parking_lot::Mutex<HashMap<u32, usize>>,
}

impl CzarAccounting {
    fn try_reserve(&self, czar_id: u32) -> bool {
        let mut in_flight = self.in_flight.lock();
        let count = in_flight.entry(czar_id).or_insert(0);
        if *count >= self.per_czar_cap {
            return false;
        }
        *count += 1;
        true
    }

    fn release(&self, czar_id: u32) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(&czar_id) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&czar_id);
            }
        }
    }
}

/// Meters concurrent outbound transmits with an interactive reservation and a per-czar
/// fairness cap. Acquisition is RAII and always happens outside any other lock the caller
/// holds, per the lock-ordering rule in §5.
#[derive(Debug)]
pub struct TransmitMgr {
    general: AsyncSemaphore,
    czar_accounting: Arc<CzarAccounting>,
    metrics: Metrics,
}

impl TransmitMgr {
    /// Construct a new manager, registering its gauge in `registry`.
    pub fn new(config: TransmitMgrConfig, registry: &Registry) -> Self {
        Self {
            general: AsyncSemaphore::new(config.total, config.interactive_reserved),
            czar_accounting: Arc::new(CzarAccounting {
                per_czar_cap: config.per_czar_cap,
                in_flight: parking_lot::Mutex::new(HashMap::new()),
            }),
            metrics: Metrics {
                in_flight: registry.register_metric(
                    "transmit_in_flight",
                    "number of outbound result transmits currently admitted",
                ),
            },
        }
    }

    /// Acquire a transmit slot for `czar_id`. Errored or cancelled data uses `interactive =
    /// true` to bypass ordinary back-pressure and claim interactive priority, per §4.4.
    ///
    /// This call can itself block on the per-czar cap even once a global slot is free; that's
    /// intentional fairness, not a queue-full error, so it has no failure mode — only a wait.
    pub async fn acquire(&self, czar_id: u32, interactive: bool) -> TransmitPermit {
        let global = if interactive {
            self.general.acquire_privileged().await
        } else {
            self.general.acquire().await
        };
        // Spin-wait on the per-czar cap via short yields rather than a dedicated condvar per
        // czar: czar counts are small and contention here is rare (only one czar saturating its
        // own cap blocks itself, never another czar).
        loop {
            if self.czar_accounting.try_reserve(czar_id) {
                break;
            }
            tokio::task::yield_now().await;
        }
        let in_flight_gauge = self.metrics.in_flight.recorder(&[]);
        in_flight_gauge.inc(1);
        TransmitPermit {
            _global: global,
            czar_id,
            mgr: Arc::clone(&self.czar_accounting),
            in_flight_gauge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_czar_cap_is_enforced_independently_of_the_global_pool() {
        let registry = Registry::new();
        let mgr = TransmitMgr::new(
            TransmitMgrConfig {
                total: 10,
                interactive_reserved: 2,
                per_czar_cap: 2,
            },
            &registry,
        );
        let _a = mgr.acquire(1, false).await;
        let _b = mgr.acquire(1, false).await;
        // Czar 1 is now at its cap of 2, but czar 2 must still be able to acquire freely.
        let _c = mgr.acquire(2, false).await;
        assert_eq!(
            *mgr.czar_accounting.in_flight.lock().get(&1).unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn releasing_a_permit_frees_the_per_czar_slot() {
        let registry = Registry::new();
        let mgr = TransmitMgr::new(TransmitMgrConfig::default(), &registry);
        let permit = mgr.acquire(9, true).await;
        drop(permit);
        assert!(mgr.czar_accounting.in_flight.lock().get(&9).is_none());
    }
}
