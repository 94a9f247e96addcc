use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;

// MD5 digests 128-bit blocks; 512 * 16 bytes per read keeps the hasher fed
// without buffering whole files.
const HASH_BLOCK_SIZE: usize = 512 * 16;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("path not found in workspace: {0}")]
    NotFound(PathBuf),
    #[error("manifest entry for `{path}` is missing required field `{field}`")]
    MalformedRecord { path: String, field: &'static str },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted form of a single file-table entry. Directories serialize as
/// `{"isfile": false}`; the remaining fields only exist for regular files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub isfile: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atimestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtimestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<u32>,
}

#[derive(Debug)]
enum RecordKind {
    Directory,
    File {
        size: u64,
        atimestamp: f64,
        mtimestamp: f64,
        attribute: u32,
        md5: OnceLock<String>,
    },
}

/// Metadata for one workspace path, either captured from a local stat or
/// reconstructed from a persisted manifest entry. Immutable once built; the
/// content hash is computed on first use and cached for the record's
/// lifetime.
#[derive(Debug)]
pub struct FileRecord {
    relpath: String,
    abspath: PathBuf,
    kind: RecordKind,
}

impl FileRecord {
    /// Stat `relpath` under `workspace`. Hashing is deferred until the hash
    /// is first requested.
    pub async fn from_local_file(relpath: &str, workspace: &Path) -> Result<Self, RecordError> {
        let abspath = workspace.join(relpath);
        let meta = tokio::fs::metadata(&abspath).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                RecordError::NotFound(abspath.clone())
            } else {
                RecordError::Io(err)
            }
        })?;

        let kind = if meta.is_file() {
            RecordKind::File {
                size: meta.len(),
                atimestamp: meta.atime() as f64 + meta.atime_nsec() as f64 * 1e-9,
                mtimestamp: meta.mtime() as f64 + meta.mtime_nsec() as f64 * 1e-9,
                attribute: meta.mode(),
                md5: OnceLock::new(),
            }
        } else {
            RecordKind::Directory
        };

        Ok(Self {
            relpath: relpath.to_string(),
            abspath,
            kind,
        })
    }

    /// Rebuild a record from a persisted entry. Trusts the supplied fields
    /// and never touches the filesystem.
    pub fn from_persisted(
        relpath: &str,
        workspace: &Path,
        entry: &ManifestEntry,
    ) -> Result<Self, RecordError> {
        let kind = if entry.isfile {
            let md5 = OnceLock::new();
            let _ = md5.set(require(relpath, entry.md5.clone(), "md5")?);
            RecordKind::File {
                size: require(relpath, entry.size, "size")?,
                atimestamp: require(relpath, entry.atimestamp, "atimestamp")?,
                mtimestamp: require(relpath, entry.mtimestamp, "mtimestamp")?,
                attribute: require(relpath, entry.attribute, "attribute")?,
                md5,
            }
        } else {
            RecordKind::Directory
        };

        Ok(Self {
            relpath: relpath.to_string(),
            abspath: workspace.join(relpath),
            kind,
        })
    }

    /// Hex MD5 of the file's full contents, streaming the file on first call
    /// and serving the cached digest afterwards. `None` for directories.
    pub async fn content_md5(&self) -> Result<Option<&str>, RecordError> {
        let RecordKind::File { md5, .. } = &self.kind else {
            return Ok(None);
        };
        if let Some(hash) = md5.get() {
            return Ok(Some(hash));
        }
        let computed = hash_file(&self.abspath).await?;
        Ok(Some(md5.get_or_init(|| computed)))
    }

    /// Digest already known for this record, without touching the filesystem.
    pub fn cached_md5(&self) -> Option<&str> {
        match &self.kind {
            RecordKind::File { md5, .. } => md5.get().map(String::as_str),
            RecordKind::Directory => None,
        }
    }

    pub async fn to_entry(&self) -> Result<ManifestEntry, RecordError> {
        match &self.kind {
            RecordKind::Directory => Ok(ManifestEntry {
                isfile: false,
                md5: None,
                size: None,
                atimestamp: None,
                mtimestamp: None,
                attribute: None,
            }),
            RecordKind::File {
                size,
                atimestamp,
                mtimestamp,
                attribute,
                ..
            } => {
                let md5 = self.content_md5().await?.map(str::to_string);
                Ok(ManifestEntry {
                    isfile: true,
                    md5,
                    size: Some(*size),
                    atimestamp: Some(*atimestamp),
                    mtimestamp: Some(*mtimestamp),
                    attribute: Some(*attribute),
                })
            }
        }
    }

    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    pub fn abspath(&self) -> &Path {
        &self.abspath
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, RecordKind::File { .. })
    }

    pub fn size(&self) -> Option<u64> {
        match &self.kind {
            RecordKind::File { size, .. } => Some(*size),
            RecordKind::Directory => None,
        }
    }

    pub fn atimestamp(&self) -> Option<f64> {
        match &self.kind {
            RecordKind::File { atimestamp, .. } => Some(*atimestamp),
            RecordKind::Directory => None,
        }
    }

    pub fn mtimestamp(&self) -> Option<f64> {
        match &self.kind {
            RecordKind::File { mtimestamp, .. } => Some(*mtimestamp),
            RecordKind::Directory => None,
        }
    }

    pub fn attribute(&self) -> Option<u32> {
        match &self.kind {
            RecordKind::File { attribute, .. } => Some(*attribute),
            RecordKind::Directory => None,
        }
    }
}

async fn hash_file(path: &Path) -> Result<String, RecordError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

fn require<T>(relpath: &str, value: Option<T>, field: &'static str) -> Result<T, RecordError> {
    value.ok_or_else(|| RecordError::MalformedRecord {
        path: relpath.to_string(),
        field,
    })
}
