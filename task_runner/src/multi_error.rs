//! An ordered collector of per-fragment errors, grounded on `util::MultiError` as referenced
//! throughout `Executive.h`/`QueryRunner.cc`.
//!
//! Rendered exactly as §7 "User-visible failure" describes: a single-line concatenation of every
//! collected error, prefixed by the owning chunk.

use std::fmt;

/// Accumulates errors for one task's chunk, rendering them the way the error response message
/// expects.
#[derive(Debug, Default, Clone)]
pub struct MultiError {
    chunk: Option<qserv_types::ChunkId>,
    errors: Vec<String>,
}

impl MultiError {
    /// A fresh, empty collector for `chunk`.
    pub fn new(chunk: qserv_types::ChunkId) -> Self {
        Self {
            chunk: Some(chunk),
            errors: Vec::new(),
        }
    }

    /// Record one error.
    pub fn push(&mut self, err: impl fmt::Display) {
        self.errors.push(err.to_string());
    }

    /// Whether anything has been collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of errors collected.
    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(chunk) = self.chunk {
            write!(f, "chunk #{}: ", chunk.0)?;
        }
        write!(f, "{}", self.errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qserv_types::ChunkId;

    #[test]
    fn renders_chunk_prefixed_single_line() {
        let mut errs = MultiError::new(ChunkId(42));
        errs.push("first failure");
        errs.push("second failure");
        assert_eq!(errs.to_string(), "chunk #42: first failure; second failure");
    }

    #[test]
    fn empty_collector_is_reported_as_empty() {
        let errs = MultiError::new(ChunkId(1));
        assert!(errs.is_empty());
        assert_eq!(errs.to_string(), "chunk #1: ");
    }
}
