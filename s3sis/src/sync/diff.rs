use super::manifest::Manifest;
use super::record::{FileRecord, RecordError};

/// Which metadata comparisons participate in a diff. Content hashes are
/// always compared; timestamps and permission bits are opt-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    pub compare_timestamps: bool,
    pub compare_attributes: bool,
}

/// Classification of every path across two manifests. A path lands in at
/// most one bucket per diff.
#[derive(Debug, Default)]
pub struct ManifestDiff {
    /// Present only in the left-hand manifest.
    pub added: Vec<FileRecord>,
    /// Present in both, content hash differs (or the path toggled between
    /// file and directory).
    pub edited_hash: Vec<FileRecord>,
    /// Present in both with equal hashes, access or modify time differs.
    pub edited_timestamp: Vec<FileRecord>,
    /// Present in both with equal hashes and timestamps, mode bits differ.
    pub edited_attributes: Vec<FileRecord>,
    /// Present only in the right-hand manifest.
    pub deleted: Vec<FileRecord>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.edited_hash.is_empty()
            && self.edited_timestamp.is_empty()
            && self.edited_attributes.is_empty()
            && self.deleted.is_empty()
    }
}

/// Compare two manifests. Output order is deterministic: buckets follow the
/// file table's path order. Records carry the left manifest's metadata
/// except for `deleted`, which only the right side knows about.
pub fn diff(
    left: &Manifest,
    right: &Manifest,
    options: DiffOptions,
) -> Result<ManifestDiff, RecordError> {
    let workspace = left.workspace();
    let mut out = ManifestDiff::default();

    for (path, entry) in left.entries() {
        let Some(other) = right.entry(path) else {
            out.added.push(FileRecord::from_persisted(path, workspace, entry)?);
            continue;
        };
        if !entry.isfile && !other.isfile {
            // Directories on both sides never count as changed.
            continue;
        }
        if entry.md5 != other.md5 {
            // Covers content changes and file<->directory toggles; a hash
            // mismatch ends classification for this path.
            out.edited_hash
                .push(FileRecord::from_persisted(path, workspace, entry)?);
            continue;
        }
        if options.compare_timestamps
            && (entry.atimestamp != other.atimestamp || entry.mtimestamp != other.mtimestamp)
        {
            out.edited_timestamp
                .push(FileRecord::from_persisted(path, workspace, entry)?);
            continue;
        }
        if options.compare_attributes && entry.attribute != other.attribute {
            out.edited_attributes
                .push(FileRecord::from_persisted(path, workspace, entry)?);
        }
    }

    for (path, entry) in right.entries() {
        if left.entry(path).is_none() {
            out.deleted
                .push(FileRecord::from_persisted(path, workspace, entry)?);
        }
    }

    Ok(out)
}
