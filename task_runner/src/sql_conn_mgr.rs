//! Database connection admission (§4.5 step 2), grounded on `wsched`/`wdb`'s connection
//! reservation and reusing `tracker::AsyncSemaphore` the same way `result_channel::TransmitMgr`
//! does for outbound transmits.

use qserv_types::{SqlConnection, SqlDriver, SqlError};
use std::sync::Arc;
use tracker::{AsyncSemaphore, SemaphorePermit};

/// Configuration for a [`SqlConnMgr`].
#[derive(Debug, Clone, Copy)]
pub struct SqlConnMgrConfig {
    /// Total concurrently open connections this worker will hand out.
    pub total: usize,
    /// Of `total`, how many are reserved for single-task interactive queries.
    pub interactive_reserved: usize,
}

impl Default for SqlConnMgrConfig {
    fn default() -> Self {
        Self {
            total: 64,
            interactive_reserved: 8,
        }
    }
}

/// A held connection admission slot plus the connection it admitted.
#[derive(Debug)]
pub struct AdmittedConnection {
    /// The open connection.
    pub conn: Box<dyn SqlConnection>,
    _permit: SemaphorePermit,
}

/// Admits database connections, reserving some slots for single-task interactive queries.
///
/// Multi-task queries (the near-neighbor subchunk case) must never be admitted as interactive:
/// §4.5 step 2 calls this out explicitly, since a multi-task query holding an interactive slot
/// while waiting on its sibling tasks could deadlock against itself.
#[derive(Debug)]
pub struct SqlConnMgr {
    admission: AsyncSemaphore,
}

impl SqlConnMgr {
    /// Construct a new manager.
    pub fn new(config: SqlConnMgrConfig) -> Self {
        Self {
            admission: AsyncSemaphore::new(config.total, config.interactive_reserved),
        }
    }

    /// Acquire a connection from `driver`, admitted as interactive only if `interactive` is true
    /// *and* the caller is a single-task query (the caller is responsible for that second
    /// condition; this method only gates on the flag it's given).
    pub async fn connect(
        &self,
        driver: &dyn SqlDriver,
        interactive: bool,
    ) -> Result<AdmittedConnection, SqlError> {
        let permit = if interactive {
            self.admission.acquire_privileged().await
        } else {
            self.admission.acquire().await
        };
        let conn = driver.connect().await?;
        Ok(AdmittedConnection {
            conn,
            _permit: permit,
        })
    }
}
