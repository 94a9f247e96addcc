use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store returned {status} for key {key}: {body}")]
    Api {
        status: StatusCode,
        key: String,
        body: String,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Client for a keyed blob store with an S3-compatible HTTP surface:
/// objects live at `{endpoint}/{key}` and respond to GET/PUT/HEAD.
#[derive(Clone)]
pub struct StoreClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl StoreClient {
    /// Default virtual-host-style endpoint for a bucket in a region.
    pub fn for_bucket(bucket: &str, region: &str, token: Option<String>) -> Result<Self, StoreError> {
        Self::with_base_url(&format!("https://{bucket}.s3.{region}.amazonaws.com"), token)
    }

    pub fn with_base_url(base_url: &str, token: Option<String>) -> Result<Self, StoreError> {
        let mut base_url = Url::parse(base_url)?;
        // Keys are joined onto the endpoint path, which requires a trailing slash.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token,
        })
    }

    /// Whether an object exists under `key`. Probe failures of any kind
    /// (transport or status) read as absent.
    pub async fn object_exists(&self, key: &str) -> bool {
        let Ok(url) = self.object_url(key) else {
            return false;
        };
        match self.request(self.http.head(url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Fetch an object's full body into memory. Meant for small documents
    /// such as manifests; file payloads go through `download_to_path`.
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.object_url(key)?;
        let response = self.request(self.http.get(url)).send().await?;
        let response = Self::check_status(response, key).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Store `body` under `key`, replacing any existing object.
    pub async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        let response = self.request(self.http.put(url)).body(body).send().await?;
        Self::check_status(response, key).await?;
        Ok(())
    }

    /// Stream an object to `target`, creating parent directories as needed.
    /// The payload lands in a `.partial` sibling first and is renamed into
    /// place once fully written.
    pub async fn download_to_path(&self, key: &str, target: &Path) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        let response = self.request(self.http.get(url)).send().await?;
        let response = Self::check_status(response, key).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    /// Stream a local file's contents to `key`.
    pub async fn upload_from_path(&self, key: &str, source: &Path) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        let file = tokio::fs::File::open(source).await?;
        let stream = ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        let response = self.request(self.http.put(url)).body(body).send().await?;
        Self::check_status(response, key).await?;
        Ok(())
    }

    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(key)?)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn check_status(
        response: reqwest::Response,
        key: &str,
    ) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Api {
                status,
                key: key.to_string(),
                body,
            })
        }
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
