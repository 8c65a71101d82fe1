use std::sync::atomic::{AtomicBool, Ordering};

/// Whether this process currently holds the memory database's exclusive lock. Modeled as a
/// single process-wide flag rather than a value threaded through every call, mirroring how the
/// original worker takes the lock once at startup and holds it for the process lifetime: any
/// component may need to assert ownership before touching the in-memory tables, not just the
/// one that originally acquired it.
static LOCK_HELD: AtomicBool = AtomicBool::new(false);

/// Lock-ownership failures a [`crate::Backend`] can report back to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// [`init`] was called twice without an intervening [`shutdown`].
    #[error("memory database lock is already held by this process")]
    AlreadyHeld,
    /// A load or discard was attempted after the lock was released (or was never acquired).
    #[error("memory database lock is not held by this process")]
    NotHeld,
}

/// Acquire the process-wide memory database lock. Call once at worker startup.
///
/// # Errors
///
/// [`LockError::AlreadyHeld`] if called again before [`shutdown`].
pub fn init() -> Result<(), LockError> {
    if LOCK_HELD.swap(true, Ordering::AcqRel) {
        return Err(LockError::AlreadyHeld);
    }
    Ok(())
}

/// Release the process-wide memory database lock. Idempotent.
pub fn shutdown() {
    LOCK_HELD.store(false, Ordering::Release);
}

/// Whether [`init`] has been called without a matching [`shutdown`].
pub fn is_held() -> bool {
    LOCK_HELD.load(Ordering::Acquire)
}

/// Confirm the lock is held, for backends that have no independent way to check.
pub fn require_ownership() -> Result<(), LockError> {
    if is_held() {
        Ok(())
    } else {
        Err(LockError::NotHeld)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn init_then_shutdown_round_trips() {
        shutdown();
        assert!(!is_held());
        init().expect("first init succeeds");
        assert!(is_held());
        shutdown();
        assert!(!is_held());
    }

    #[test]
    #[serial]
    fn double_init_is_rejected() {
        shutdown();
        init().expect("first init succeeds");
        assert_matches::assert_matches!(init(), Err(LockError::AlreadyHeld));
        shutdown();
    }
}
