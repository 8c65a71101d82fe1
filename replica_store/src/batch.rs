//! Batched `replica_file` lookups (spec §4.7 "Batched file fetch"): reloading a large replica
//! set looks up files with an `IN (...)` query bounded by the session's max packet size minus a
//! 1 KiB safety margin.
//!
//! Grounded on `replica/DatabaseServicesMySQL.cc`'s chunked `IN`-list fetch for `replica_file`.

use crate::store::ReplicaStore;
use crate::{Error, Result};
use iox_time::Time;
use sqlx::Row;
use std::collections::HashMap;

/// The safety margin subtracted from the session's `max_allowed_packet` before computing how
/// many ids fit in one `IN (...)` list (spec §4.7).
const SAFETY_MARGIN_BYTES: usize = 1024;

/// Bytes of wire budget consumed by one id in the `IN (...)` list: a comma/separator byte plus
/// the worst-case decimal width of a `u64` (`digits10(UINT64_MAX) == 20`).
const BYTES_PER_ID: usize = 1 + 20;

/// Compute how many replica ids fit in one batch of the `IN (...)` lookup, given the session's
/// `max_allowed_packet` in bytes.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if `max_packet_bytes` doesn't leave room for even one id after the
/// safety margin (spec §8 boundary: refused at exactly 1 KiB, not just below it, since the
/// margin alone would consume the whole packet).
pub fn file_fetch_batch_size(max_packet_bytes: usize) -> Result<usize> {
    if max_packet_bytes <= SAFETY_MARGIN_BYTES {
        return Err(Error::InvalidArgument {
            message: format!(
                "max packet size {max_packet_bytes} does not exceed the {SAFETY_MARGIN_BYTES}-byte safety margin"
            ),
        });
    }
    let batch = (max_packet_bytes - SAFETY_MARGIN_BYTES) / BYTES_PER_ID;
    if batch == 0 {
        return Err(Error::InvalidArgument {
            message: "max packet size too small to fit even one id per batch".into(),
        });
    }
    Ok(batch)
}

impl ReplicaStore {
    /// Fetch every `replica_file` row for `replica_ids`, split into batches per
    /// [`file_fetch_batch_size`], and accumulate them keyed by `replica_id`.
    pub(crate) async fn fetch_files_batched(
        &self,
        replica_ids: &[u64],
    ) -> Result<HashMap<u64, Vec<qserv_types::ReplicaFile>>> {
        let mut out: HashMap<u64, Vec<qserv_types::ReplicaFile>> = HashMap::new();
        if replica_ids.is_empty() {
            return Ok(out);
        }

        let batch_size = file_fetch_batch_size(self.max_allowed_packet)?;
        for chunk in replica_ids.chunks(batch_size) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT replica_id, name, size, mtime, cs, begin_create_time, end_create_time \
                 FROM replica_file WHERE replica_id IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            let rows = query.fetch_all(self.pool()).await?;
            for row in rows {
                let replica_id: u64 = row.try_get("replica_id")?;
                let begin: Option<chrono::NaiveDateTime> = row.try_get("begin_create_time")?;
                let end: Option<chrono::NaiveDateTime> = row.try_get("end_create_time")?;
                let mtime: chrono::NaiveDateTime = row.try_get("mtime")?;
                let file = qserv_types::ReplicaFile {
                    name: row.try_get("name")?,
                    size: {
                        let size: i64 = row.try_get("size")?;
                        size as u64
                    },
                    mtime: Time::from_datetime(chrono::DateTime::from_naive_utc_and_offset(
                        mtime,
                        chrono::Utc,
                    )),
                    checksum: {
                        let cs: i64 = row.try_get("cs")?;
                        cs as u64
                    },
                    begin_transfer_time: begin.map(|t| {
                        Time::from_datetime(chrono::DateTime::from_naive_utc_and_offset(
                            t,
                            chrono::Utc,
                        ))
                    }),
                    end_transfer_time: end.map(|t| {
                        Time::from_datetime(chrono::DateTime::from_naive_utc_and_offset(
                            t,
                            chrono::Utc,
                        ))
                    }),
                };
                out.entry(replica_id).or_default().push(file);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_at_exactly_the_safety_margin() {
        assert!(matches!(
            file_fetch_batch_size(1024),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn refuses_below_the_safety_margin() {
        assert!(matches!(
            file_fetch_batch_size(512),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn accepts_just_enough_for_one_id() {
        // 1024 + 21 = 1045 is the smallest packet that yields batch size 1.
        assert_eq!(file_fetch_batch_size(1045).unwrap(), 1);
        assert!(matches!(
            file_fetch_batch_size(1044),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn scales_linearly_with_packet_size() {
        assert_eq!(file_fetch_batch_size(1024 + 21 * 100).unwrap(), 100);
    }
}
