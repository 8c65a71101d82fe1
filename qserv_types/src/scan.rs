use std::cmp::Ordering;

/// A totally ordered scan-speed rating. Smaller is faster: `FASTEST < FAST < MEDIUM < SLOW`.
///
/// A table carries one of these; a task's rating is the max over the tables its fragments
/// reference (the slowest table in the task wins, §3 "Scan rating").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScanRating {
    /// Fastest tier: small, fully cached tables.
    Fastest,
    /// Fast tier.
    Fast,
    /// Medium tier.
    Medium,
    /// Slow tier: large tables expensive to scan.
    Slow,
}

impl ScanRating {
    /// All ratings, fastest first. Used by the blend scheduler to enumerate its per-band scan
    /// sub-schedulers.
    pub const ALL: [Self; 4] = [Self::Fastest, Self::Fast, Self::Medium, Self::Slow];
}

/// One table referenced by a task, along with its scan rating. Mirrors
/// `protojson::ScanTableInfo` from the original source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTableInfo {
    /// Database the table lives in.
    pub db: String,
    /// Table name.
    pub table: String,
    /// Whether this table should be pinned in memory while in use.
    pub lock_in_mem: bool,
    /// This table's scan rating.
    pub rating: ScanRating,
}

impl ScanTableInfo {
    /// Construct a new scan-table descriptor.
    pub fn new(db: impl Into<String>, table: impl Into<String>, lock_in_mem: bool, rating: ScanRating) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            lock_in_mem,
            rating,
        }
    }
}

/// The scan metadata carried by a task: its overall rating plus the per-table breakdown used to
/// order tasks within a chunk (slowest table first, ties broken by table name descending),
/// grounded on the original `ScanInfo::sortTablesSlowestFirst` behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanInfo {
    /// The tables this scan references.
    pub info_tables: Vec<ScanTableInfo>,
}

impl ScanInfo {
    /// Construct scan info from a list of table descriptors; `scan_rating` is the max rating
    /// across `info_tables` (callers usually just call [`Self::rating`] instead of tracking it
    /// separately).
    pub fn new(info_tables: Vec<ScanTableInfo>) -> Self {
        Self { info_tables }
    }

    /// The overall scan rating: the slowest table referenced, or [`ScanRating::Fastest`] for a
    /// table-less scan.
    pub fn rating(&self) -> ScanRating {
        self.info_tables
            .iter()
            .map(|t| t.rating)
            .max()
            .unwrap_or(ScanRating::Fastest)
    }

    /// Sort the referenced tables slowest-first, breaking ties by descending table name (the
    /// alphabetically later name comes first). This is the exact ordering the blend scheduler's
    /// per-chunk max-heap uses to decide which table's subchunks get loaded first (§8 scenario 2:
    /// MEDIUM/delta before MEDIUM/charlie).
    pub fn sort_tables_slowest_first(&mut self) {
        self.info_tables.sort_by(|a, b| {
            match b.rating.cmp(&a.rating) {
                Ordering::Equal => b.table.cmp(&a.table),
                other => other,
            }
        });
    }

    /// The slowest table's name, used as the scheduler's tie-break key. On a rating tie, the
    /// alphabetically later name wins, matching [`Self::sort_tables_slowest_first`].
    pub fn slowest_table_name(&self) -> Option<&str> {
        self.info_tables
            .iter()
            .max_by(|a, b| a.rating.cmp(&b.rating).then_with(|| a.table.cmp(&b.table)))
            .map(|t| t.table.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_ordering_is_speed_ascending() {
        assert!(ScanRating::Fastest < ScanRating::Fast);
        assert!(ScanRating::Fast < ScanRating::Medium);
        assert!(ScanRating::Medium < ScanRating::Slow);
    }

    #[test]
    fn sort_tables_slowest_first_breaks_ties_by_name() {
        let mut info = ScanInfo::new(vec![
            ScanTableInfo::new("moose", "charlie", true, ScanRating::Medium),
            ScanTableInfo::new("moose", "delta", true, ScanRating::Medium),
            ScanTableInfo::new("moose", "bravo", true, ScanRating::Slow),
            ScanTableInfo::new("moose", "alpha", true, ScanRating::Fast),
        ]);
        info.sort_tables_slowest_first();
        let names: Vec<&str> = info.info_tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(names, vec!["bravo", "delta", "charlie", "alpha"]);
        assert_eq!(info.rating(), ScanRating::Slow);
    }
}
