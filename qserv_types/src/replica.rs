use iox_time::Time;

/// One file belonging to a replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaFile {
    /// File name, relative to the chunk's data directory.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time reported by the worker's filesystem.
    pub mtime: Time,
    /// Checksum (e.g. CRC32) of the file contents.
    pub checksum: u64,
    /// When the transfer of this file began, if it has started.
    pub begin_transfer_time: Option<Time>,
    /// When the transfer of this file finished. A file with no end time has not arrived yet and
    /// is not counted as present for completeness purposes.
    pub end_transfer_time: Option<Time>,
}

impl ReplicaFile {
    /// True once the file's transfer has been recorded as finished.
    pub fn is_present(&self) -> bool {
        self.end_transfer_time.is_some()
    }
}

/// A worker-reported replica: `(worker, database, chunk, verifyTime, files[])`.
///
/// A replica is COMPLETE iff all of its declared files are present; only complete replicas
/// may be persisted. Updating a replica is always delete-then-insert because file rows
/// are cascade-owned by the replica row — there is deliberately no in-place file mutation here.
#[derive(Debug, Clone, PartialEq)]
pub struct Replica {
    /// The worker that reported this replica.
    pub worker: String,
    /// The database the chunk belongs to.
    pub database: String,
    /// The chunk identifier.
    pub chunk: crate::ChunkId,
    /// Last time this replica was checksum-verified.
    pub verify_time: Time,
    /// The files making up this replica.
    pub files: Vec<ReplicaFile>,
}

impl Replica {
    /// The composite identity used for set-theoretic comparison: `(worker, database, chunk)`.
    pub fn identity(&self) -> (&str, &str, crate::ChunkId) {
        (&self.worker, &self.database, self.chunk)
    }

    /// A replica is complete iff it has at least one declared file and every declared file is
    /// present. An empty file list is never complete: it would otherwise vacuously satisfy
    /// "all declared files are present".
    pub fn is_complete(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(ReplicaFile::is_present)
    }

    /// Deep comparison including the file list, used by replica-collection reconciliation to
    /// decide whether an entry present in both the old and new state actually changed.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.verify_time == other.verify_time && self.files == other.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChunkId;

    fn file(name: &str, present: bool) -> ReplicaFile {
        ReplicaFile {
            name: name.to_string(),
            size: 100,
            mtime: Time::from_timestamp(0),
            checksum: 0xdead_beef,
            begin_transfer_time: Some(Time::from_timestamp(0)),
            end_transfer_time: present.then(|| Time::from_timestamp(1)),
        }
    }

    #[test]
    fn empty_file_list_is_never_complete() {
        let r = Replica {
            worker: "A".into(),
            database: "D".into(),
            chunk: ChunkId(1),
            verify_time: Time::from_timestamp(0),
            files: vec![],
        };
        assert!(!r.is_complete());
    }

    #[test]
    fn incomplete_if_any_file_missing() {
        let r = Replica {
            worker: "A".into(),
            database: "D".into(),
            chunk: ChunkId(1),
            verify_time: Time::from_timestamp(0),
            files: vec![file("a.dat", true), file("b.dat", false)],
        };
        assert!(!r.is_complete());
    }

    #[test]
    fn complete_when_every_file_present() {
        let r = Replica {
            worker: "A".into(),
            database: "D".into(),
            chunk: ChunkId(1),
            verify_time: Time::from_timestamp(0),
            files: vec![file("a.dat", true), file("b.dat", true)],
        };
        assert!(r.is_complete());
    }
}
