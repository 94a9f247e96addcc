use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures_util::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::{FileRecord, ManifestEntry, RecordError};

pub const DEFAULT_MANIFEST_RELPATH: &str = ".s3sis/manifest.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest document: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Record(#[from] RecordError),
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestDoc {
    project: String,
    label: String,
    filelist: BTreeMap<String, ManifestEntry>,
}

/// Snapshot of a workspace's file table, persisted as JSON under
/// `.s3sis/manifest.json` and published remotely under a label.
#[derive(Debug)]
pub struct Manifest {
    workspace: PathBuf,
    manifest_path: PathBuf,
    project: String,
    label: String,
    filelist: BTreeMap<String, ManifestEntry>,
    scan_width: usize,
}

impl Manifest {
    pub fn new_empty(workspace: &Path, project: &str, label: &str, scan_width: usize) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            manifest_path: workspace.join(DEFAULT_MANIFEST_RELPATH),
            project: project.to_string(),
            label: label.to_string(),
            filelist: BTreeMap::new(),
            scan_width: scan_width.max(1),
        }
    }

    /// Open the workspace manifest, loading the persisted document when one
    /// exists. A missing document is the first-run case, not an error.
    pub async fn open(
        workspace: &Path,
        project: &str,
        label: &str,
        scan_width: usize,
    ) -> Result<Self, ManifestError> {
        let mut manifest = Self::new_empty(workspace, project, label, scan_width);
        manifest.reload().await?;
        manifest.label = label.to_string();
        Ok(manifest)
    }

    /// Parse a manifest document fetched from the remote store. The file
    /// table is bound to the local `workspace` so its records resolve to
    /// local paths.
    pub fn from_document(workspace: &Path, bytes: &[u8]) -> Result<Self, ManifestError> {
        let doc: ManifestDoc = serde_json::from_slice(bytes)?;
        Ok(Self {
            workspace: workspace.to_path_buf(),
            manifest_path: workspace.join(DEFAULT_MANIFEST_RELPATH),
            project: doc.project,
            label: doc.label,
            filelist: doc.filelist,
            scan_width: 1,
        })
    }

    /// Re-read the persisted document if present.
    pub async fn reload(&mut self) -> Result<(), ManifestError> {
        match tokio::fs::read(&self.manifest_path).await {
            Ok(bytes) => {
                let doc: ManifestDoc = serde_json::from_slice(&bytes)?;
                self.label = doc.label;
                self.filelist = doc.filelist;
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Clear the file table and rebuild it from a full workspace walk,
    /// fanning the per-file stat + hash work out over the scan pool. Any
    /// single file's failure aborts the whole rebuild; a partial table would
    /// poison every later diff.
    pub async fn regenerate(&mut self) -> Result<(), ManifestError> {
        let relpaths = self.collect_relpaths().await?;
        let workspace = self.workspace.clone();
        let entries: Vec<(String, ManifestEntry)> = stream::iter(relpaths.into_iter().map(
            |relpath| {
                let workspace = workspace.clone();
                async move {
                    let record = FileRecord::from_local_file(&relpath, &workspace).await?;
                    let entry = record.to_entry().await?;
                    Ok::<_, RecordError>((relpath, entry))
                }
            },
        ))
        .buffer_unordered(self.scan_width)
        .try_collect()
        .await?;

        self.filelist = entries.into_iter().collect();
        Ok(())
    }

    /// Persist the current state, creating parent directories as needed. The
    /// document is written to a `.partial` sibling and renamed into place.
    pub async fn write(&self) -> Result<(), ManifestError> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = self.manifest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = self.manifest_path.with_extension("json.partial");
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(partial, &self.manifest_path).await?;
        Ok(())
    }

    /// Remove the persisted document; idempotent.
    pub async fn delete(&self) -> Result<(), ManifestError> {
        match tokio::fs::remove_file(&self.manifest_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let doc = ManifestDoc {
            project: self.project.clone(),
            label: self.label.clone(),
            filelist: self.filelist.clone(),
        };
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Reconstruct `FileRecord`s for every entry in the file table.
    pub fn file_info_list(&self) -> Result<Vec<FileRecord>, RecordError> {
        self.filelist
            .iter()
            .map(|(relpath, entry)| FileRecord::from_persisted(relpath, &self.workspace, entry))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.filelist.iter()
    }

    pub fn entry(&self, relpath: &str) -> Option<&ManifestEntry> {
        self.filelist.get(relpath)
    }

    pub fn insert_entry(&mut self, relpath: &str, entry: ManifestEntry) {
        self.filelist.insert(relpath.to_string(), entry);
    }

    pub fn remove_entry(&mut self, relpath: &str) {
        self.filelist.remove(relpath);
    }

    pub fn len(&self) -> usize {
        self.filelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filelist.is_empty()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    async fn collect_relpaths(&self) -> Result<Vec<String>, ManifestError> {
        // The manifest never tracks its own persisted document, nor the
        // state directory holding it; otherwise the first write would make
        // every later rescan look dirty.
        let state_dir = self
            .manifest_path
            .parent()
            .filter(|parent| *parent != self.workspace)
            .map(Path::to_path_buf);

        let mut stack = vec![self.workspace.clone()];
        let mut out = Vec::new();
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path == self.manifest_path || Some(&path) == state_dir.as_ref() {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    stack.push(path.clone());
                }
                if let Ok(relpath) = path.strip_prefix(&self.workspace) {
                    out.push(relpath.to_string_lossy().into_owned());
                }
            }
        }
        Ok(out)
    }
}
