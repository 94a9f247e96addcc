use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures_util::{StreamExt, TryStreamExt, stream};
use s3sis_store::{StoreClient, StoreError};
use thiserror::Error;

use super::manifest::{Manifest, ManifestError};
use super::record::{FileRecord, RecordError};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Project-scoped view of the object store: derives keys from content
/// hashes and labels, and fans per-file transfers out over a bounded pool.
pub struct RemoteStore {
    client: StoreClient,
    project: String,
    width: usize,
}

impl RemoteStore {
    pub fn new(client: StoreClient, project: &str, width: usize) -> Self {
        Self {
            client,
            project: project.to_string(),
            width: width.max(1),
        }
    }

    /// Key an object by its content hash. Identical content anywhere in the
    /// project maps to the same key; this is the deduplication mechanism.
    pub fn object_key(&self, md5: &str) -> String {
        format!("{}/objects/{}/object", self.project, md5)
    }

    pub fn manifest_key(&self, label: &str) -> String {
        format!("{}/labels/{}/manifest.json", self.project, label)
    }

    pub async fn object_exists(&self, key: &str) -> bool {
        self.client.object_exists(key).await
    }

    /// Upload a single file unless the key already holds an object and
    /// `overwrite` is off. Returns whether a PUT actually happened.
    pub async fn upload_file(
        &self,
        source: &Path,
        key: &str,
        overwrite: bool,
    ) -> Result<bool, TransferError> {
        if !overwrite && self.client.object_exists(key).await {
            return Ok(false);
        }
        self.client.upload_from_path(key, source).await?;
        Ok(true)
    }

    /// Upload every file record's content, bounded by the pool width.
    /// Directories are filtered out, records sharing a content hash collapse
    /// to a single candidate PUT, and the first failure aborts the batch.
    /// Returns the number of objects actually transferred.
    pub async fn upload_records(&self, records: &[FileRecord]) -> Result<usize, TransferError> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for record in records {
            if !record.is_file() {
                continue;
            }
            let Some(md5) = record.content_md5().await? else {
                continue;
            };
            let key = self.object_key(md5);
            if seen.insert(key.clone()) {
                jobs.push((record.abspath().to_path_buf(), key));
            }
        }

        stream::iter(
            jobs.into_iter()
                .map(|(source, key)| self.upload_job(source, key)),
        )
        .buffer_unordered(self.width)
        .try_fold(0usize, |uploaded, did_put| async move {
            Ok(uploaded + usize::from(did_put))
        })
        .await
    }

    pub async fn download_file(&self, key: &str, target: &Path) -> Result<(), TransferError> {
        self.client
            .download_to_path(key, target)
            .await
            .map_err(Into::into)
    }

    /// Download every file record's content to its workspace path, bounded
    /// by the pool width; the first failure aborts the batch. Returns the
    /// number of files fetched.
    pub async fn download_records(&self, records: &[FileRecord]) -> Result<usize, TransferError> {
        let mut jobs = Vec::new();
        for record in records {
            if !record.is_file() {
                continue;
            }
            let Some(md5) = record.content_md5().await? else {
                continue;
            };
            jobs.push((self.object_key(md5), record.abspath().to_path_buf()));
        }

        let count = jobs.len();
        stream::iter(
            jobs.into_iter()
                .map(|(key, target)| self.download_job(key, target)),
        )
        .buffer_unordered(self.width)
        .try_collect::<Vec<()>>()
        .await?;
        Ok(count)
    }

    /// Publish the manifest under its label, replacing any previous version.
    pub async fn upload_manifest(&self, manifest: &Manifest) -> Result<(), TransferError> {
        let key = self.manifest_key(manifest.label());
        self.client.put_object(&key, manifest.to_bytes()?).await?;
        Ok(())
    }

    /// Fetch and parse the manifest published under `label`; `None` when the
    /// label has never been published.
    pub async fn fetch_manifest(
        &self,
        workspace: &Path,
        label: &str,
    ) -> Result<Option<Manifest>, TransferError> {
        let key = self.manifest_key(label);
        match self.client.get_object(&key).await {
            Ok(bytes) => Ok(Some(Manifest::from_document(workspace, &bytes)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn upload_job(&self, source: PathBuf, key: String) -> Result<bool, TransferError> {
        self.upload_file(&source, &key, false).await
    }

    async fn download_job(&self, key: String, target: PathBuf) -> Result<(), TransferError> {
        self.download_file(&key, &target).await
    }
}
