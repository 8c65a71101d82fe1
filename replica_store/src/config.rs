use std::time::Duration;

/// The external config options enumerated in spec §6, scoped to one replica-management job.
/// Loading these from a config file is out of scope (spec §1); the caller (out of scope for
/// this core) constructs one of these directly, the way `ingester::lifecycle::LifecycleConfig`
/// is handed a plain struct rather than parsing one itself.
#[derive(Debug, Clone)]
pub struct ReplicaJobConfig {
    /// Required: the database family this replica-management job scopes to.
    pub database_family: String,
    /// Include `DISABLED`/`READ-ONLY` workers in the scan.
    pub all_workers: bool,
    /// Skip persisting replicas for this run, used to scale-test the scan path without
    /// writing.
    pub do_not_save_replica: bool,
    /// Also pull the chunk list from the worker's control plane rather than relying solely on
    /// what a worker reports back for replicas.
    pub qserv_replicas: bool,
    /// Request/job timeout. `Duration::ZERO` means "use the configured default" (spec §6).
    pub timeout: Duration,
    /// Page size for table-listing queries; `0` disables pagination.
    pub tables_page_size: usize,
    /// Cosmetic: whether table listings print a vertical separator.
    pub tables_vertical_separator: bool,
}

impl ReplicaJobConfig {
    /// Construct a config for `database_family`, with every other option at its spec-documented
    /// default.
    pub fn new(database_family: impl Into<String>) -> Self {
        Self {
            database_family: database_family.into(),
            all_workers: false,
            do_not_save_replica: false,
            qserv_replicas: false,
            timeout: Duration::ZERO,
            tables_page_size: 0,
            tables_vertical_separator: false,
        }
    }

    /// `0` is documented by spec §6 as "use the configured default"; this resolves that against
    /// a caller-supplied default so downstream code never has to special-case zero itself.
    pub fn effective_timeout(&self, configured_default: Duration) -> Duration {
        if self.timeout.is_zero() {
            configured_default
        } else {
            self.timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let cfg = ReplicaJobConfig::new("rubin");
        assert_eq!(
            cfg.effective_timeout(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn nonzero_timeout_is_used_verbatim() {
        let mut cfg = ReplicaJobConfig::new("rubin");
        cfg.timeout = Duration::from_secs(5);
        assert_eq!(
            cfg.effective_timeout(Duration::from_secs(30)),
            Duration::from_secs(5)
        );
    }
}
