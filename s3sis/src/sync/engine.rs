use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::info;

use super::diff::{DiffOptions, diff};
use super::manifest::{Manifest, ManifestError};
use super::record::{FileRecord, RecordError};
use super::remote::{RemoteStore, TransferError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("label `{0}` has never been published")]
    LabelNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Policy flags for the download workflow, one per CLI switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    pub no_overwrite: bool,
    pub preserve_timestamp: bool,
    pub preserve_attributes: bool,
    pub preserve_empty_folders: bool,
    pub cleanup: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub files_scanned: usize,
    pub objects_uploaded: usize,
    pub objects_skipped: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub files_downloaded: usize,
    pub timestamps_applied: usize,
    pub attributes_applied: usize,
    pub folders_created: usize,
    pub entries_deleted: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ManifestSummary {
    pub files: usize,
    pub directories: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub added: usize,
    pub edited: usize,
    pub deleted: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.added == 0 && self.edited == 0 && self.deleted == 0
    }
}

/// One-shot upload/download workflows over a single workspace and label.
/// Each run builds its state fresh; nothing is shared across invocations.
pub struct SyncEngine {
    store: RemoteStore,
    workspace: PathBuf,
    project: String,
    scan_width: usize,
}

impl SyncEngine {
    pub fn new(store: RemoteStore, workspace: PathBuf, project: &str, scan_width: usize) -> Self {
        Self {
            store,
            workspace,
            project: project.to_string(),
            scan_width: scan_width.max(1),
        }
    }

    /// Publish the workspace under `label`: rescan, diff against the remote
    /// manifest, upload changed objects, then replace the remote manifest.
    /// The manifest PUT is the commit point; an aborted run is repaired by
    /// simply re-running.
    pub async fn upload(&self, label: &str) -> Result<UploadReport, SyncError> {
        let mut local = self.open_local(label).await?;
        local.regenerate().await?;
        local.write().await?;

        let remote = match self.store.fetch_manifest(&self.workspace, label).await? {
            Some(manifest) => manifest,
            None => {
                info!(label, "label not published yet, uploading everything");
                Manifest::new_empty(&self.workspace, &self.project, label, self.scan_width)
            }
        };

        let d = diff(&local, &remote, DiffOptions::default())?;
        let mut candidates = d.added;
        candidates.extend(d.edited_hash);
        let candidate_files = candidates.iter().filter(|r| r.is_file()).count();

        info!(label, files = candidate_files, "uploading changed objects");
        let uploaded = self.store.upload_records(&candidates).await?;
        self.store.upload_manifest(&local).await?;
        info!(label, uploaded, "manifest published");

        Ok(UploadReport {
            files_scanned: local.len(),
            objects_uploaded: uploaded,
            objects_skipped: candidate_files - uploaded,
        })
    }

    /// Materialize the manifest published under `label` into the workspace,
    /// then persist the updated local manifest. A label that has never been
    /// published is fatal here, unlike on upload.
    pub async fn download(
        &self,
        label: &str,
        options: DownloadOptions,
    ) -> Result<DownloadReport, SyncError> {
        let mut local = self.open_local(label).await?;
        let remote = self
            .store
            .fetch_manifest(&self.workspace, label)
            .await?
            .ok_or_else(|| SyncError::LabelNotFound(label.to_string()))?;

        let d = diff(
            &remote,
            &local,
            DiffOptions {
                compare_timestamps: options.preserve_timestamp,
                compare_attributes: options.preserve_attributes,
            },
        )?;

        let mut to_fetch = d.added;
        if !options.no_overwrite {
            to_fetch.extend(d.edited_hash);
        }

        let mut report = DownloadReport::default();
        info!(
            label,
            files = to_fetch.iter().filter(|r| r.is_file()).count(),
            "downloading changed objects"
        );
        report.files_downloaded = self.store.download_records(&to_fetch).await?;

        for record in &to_fetch {
            local.insert_entry(record.relpath(), record.to_entry().await?);
            if options.preserve_empty_folders && !record.is_file() {
                tokio::fs::create_dir_all(record.abspath()).await?;
                report.folders_created += 1;
            }
        }

        if options.preserve_timestamp {
            for record in &d.edited_timestamp {
                if !record.is_file() {
                    continue;
                }
                apply_file_times(record)?;
                local.insert_entry(record.relpath(), record.to_entry().await?);
                report.timestamps_applied += 1;
            }
        }

        if options.preserve_attributes {
            for record in &d.edited_attributes {
                let Some(mode) = record.attribute() else {
                    continue;
                };
                tokio::fs::set_permissions(
                    record.abspath(),
                    std::fs::Permissions::from_mode(mode),
                )
                .await?;
                local.insert_entry(record.relpath(), record.to_entry().await?);
                report.attributes_applied += 1;
            }
        }

        if options.cleanup {
            // Children sort after their parents; walk in reverse so files
            // and subdirectories go before the directories containing them.
            let mut doomed: Vec<&FileRecord> = d.deleted.iter().collect();
            doomed.sort_by(|a, b| b.relpath().cmp(a.relpath()));
            for record in doomed {
                local.remove_entry(record.relpath());
                remove_local_path(record).await?;
                report.entries_deleted += 1;
            }
        }

        local.write().await?;
        Ok(report)
    }

    /// Rebuild and persist the local manifest from the current workspace.
    pub async fn regenerate_manifest(&self, label: &str) -> Result<ManifestSummary, SyncError> {
        let mut manifest = self.open_local(label).await?;
        manifest.regenerate().await?;
        manifest.write().await?;
        Ok(summarize(&manifest))
    }

    /// Summarize the persisted local manifest without touching it.
    pub async fn manifest_summary(&self, label: &str) -> Result<ManifestSummary, SyncError> {
        Ok(summarize(&self.open_local(label).await?))
    }

    /// Rescan the workspace in memory and report how far it has drifted from
    /// the persisted manifest.
    pub async fn validate_manifest(&self, label: &str) -> Result<ValidationReport, SyncError> {
        let persisted = self.open_local(label).await?;
        let mut current =
            Manifest::new_empty(&self.workspace, &self.project, label, self.scan_width);
        current.regenerate().await?;

        let d = diff(&current, &persisted, DiffOptions::default())?;
        Ok(ValidationReport {
            added: d.added.len(),
            edited: d.edited_hash.len(),
            deleted: d.deleted.len(),
        })
    }

    async fn open_local(&self, label: &str) -> Result<Manifest, ManifestError> {
        Manifest::open(&self.workspace, &self.project, label, self.scan_width).await
    }
}

fn summarize(manifest: &Manifest) -> ManifestSummary {
    let files = manifest.entries().filter(|(_, entry)| entry.isfile).count();
    ManifestSummary {
        files,
        directories: manifest.len() - files,
    }
}

fn apply_file_times(record: &FileRecord) -> std::io::Result<()> {
    let (Some(atime), Some(mtime)) = (record.atimestamp(), record.mtimestamp()) else {
        return Ok(());
    };
    let file = std::fs::File::options().write(true).open(record.abspath())?;
    file.set_times(
        std::fs::FileTimes::new()
            .set_accessed(system_time_from_stamp(atime))
            .set_modified(system_time_from_stamp(mtime)),
    )
}

fn system_time_from_stamp(stamp: f64) -> SystemTime {
    Duration::try_from_secs_f64(stamp.max(0.0))
        .map(|offset| UNIX_EPOCH + offset)
        .unwrap_or(UNIX_EPOCH)
}

async fn remove_local_path(record: &FileRecord) -> std::io::Result<()> {
    let result = if record.is_file() {
        tokio::fs::remove_file(record.abspath()).await
    } else {
        tokio::fs::remove_dir(record.abspath()).await
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        // A tracked directory may still hold untracked files; leave it.
        Err(err)
            if !record.is_file() && err.kind() == std::io::ErrorKind::DirectoryNotEmpty =>
        {
            Ok(())
        }
        Err(err) => Err(err),
    }
}
