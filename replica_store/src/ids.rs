//! Stringified-ULID identifiers for the control-plane rows (§3 "Controller/Job/Request/Event
//! row"). Kept as newtypes rather than bare `String` so a `JobId` can't be passed where a
//! `RequestId` is expected at a call site.

use std::fmt;
use ulid::Ulid;

macro_rules! ulid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh, time-sortable id.
            pub fn new() -> Self {
                Self(Ulid::new().to_string())
            }

            /// Wrap an existing stringified ULID, e.g. one read back from a row.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// The stringified form stored in the database.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

ulid_id!(ControllerId, "Identifies one `controller` row.");
ulid_id!(JobId, "Identifies one `job` row; jobs nest via `parent_job_id`.");
ulid_id!(RequestId, "Identifies one `request` row, owned by exactly one job.");
ulid_id!(
    EventId,
    "Identifies one `controller_log` row (an \"event\" in spec §3's terminology)."
);
ulid_id!(TransactionId, "Identifies one `transaction` row.");
