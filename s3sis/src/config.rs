use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PROFILE: &str = "default";
const CONFIG_PATH_ENV: &str = "S3SIS_CONFIG";
const CONFIG_RELPATH: &str = ".s3sis/config.json";
const DEFAULT_THREAD_POOL_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    Missing(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("profile `{0}` is not defined in the config file")]
    UnknownProfile(String),
    #[error("home directory is unavailable")]
    MissingHomeDir,
}

/// One named profile from the config file. `endpoint` and `access-token`
/// are the remote-store credentials; when `endpoint` is omitted the
/// bucket/region URL is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Profile {
    pub project: String,
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
}

/// Load a profile from the user's config file (`~/.s3sis/config.json`, or
/// the path named by `S3SIS_CONFIG`).
pub fn load_profile(name: &str) -> Result<Profile, ConfigError> {
    load_profile_from(&config_path()?, name)
}

pub fn load_profile_from(path: &Path, name: &str) -> Result<Profile, ConfigError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    let mut profiles: HashMap<String, Profile> = serde_json::from_slice(&bytes)?;
    profiles
        .remove(name)
        .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
}

fn config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or(ConfigError::MissingHomeDir)?;
    Ok(home.join(CONFIG_RELPATH))
}

fn default_thread_pool_size() -> usize {
    DEFAULT_THREAD_POOL_SIZE
}
