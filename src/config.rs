//! Configuration
//!
//! Construction-time options for [`DriveFs`](crate::fs::DriveFs), bearer
//! credentials, and the `googledrive://` URL connector.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::drive::client::DEFAULT_PAGE_SIZE;

/// Environment variable holding a bearer token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLEDRIVEFS_ACCESS_TOKEN";

/// Environment variable pointing at a credentials JSON file
pub const CREDENTIALS_PATH_ENV: &str = "GOOGLEDRIVEFS_CREDENTIALS_PATH";

const URL_SCHEME: &str = "googledrive://";

const MIB: usize = 1024 * 1024;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed credentials in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No credentials: set {ACCESS_TOKEN_ENV} or provide a credentials file")]
    MissingCredentials,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// What removing an object does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Move to the trash (recoverable)
    #[default]
    Trash,
    /// Delete for good
    Permanent,
}

/// Options for one filesystem instance
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DriveFsConfig {
    /// Folder every path is resolved under; the store root when unset
    pub root_id: Option<String>,
    /// Shared drive to operate in
    pub drive_id: Option<String>,
    pub delete_mode: DeleteMode,
    /// Entries requested per listing page
    pub page_size: u32,
    /// Uploads of at least this many bytes use the resumable protocol
    pub resumable_threshold: usize,
    /// Write buffers spill to a temporary file beyond this size
    pub spool_threshold: usize,
    /// Bytes fetched per ranged download
    pub read_chunk_size: u64,
    /// Maximum cached entries per cache index
    pub cache_capacity: u64,
}

impl Default for DriveFsConfig {
    fn default() -> Self {
        Self {
            root_id: None,
            drive_id: None,
            delete_mode: DeleteMode::Trash,
            page_size: DEFAULT_PAGE_SIZE,
            resumable_threshold: 5 * MIB,
            spool_threshold: 8 * MIB,
            read_chunk_size: 4 * MIB as u64,
            cache_capacity: 10_000,
        }
    }
}

/// OAuth credentials for the Drive API.
///
/// Only the access token is used; refresh fields are carried for callers
/// that refresh tokens themselves.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            client_id: None,
            client_secret: None,
        }
    }

    /// Read credentials from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Credentials from the environment, if a token is set there
    pub fn from_env() -> Option<Self> {
        env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .map(Self::from_token)
    }

    /// Default credentials file: `<config dir>/drivefs/credentials.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("drivefs").join("credentials.json"))
    }

    /// Find credentials: the token variable first, then the credentials file
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(credentials) = Self::from_env() {
            debug!("Using access token from environment");
            return Ok(credentials);
        }

        let path = match env::var_os(CREDENTIALS_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::default_path().ok_or(ConfigError::MissingCredentials)?,
        };
        if !path.exists() {
            return Err(ConfigError::MissingCredentials);
        }
        debug!(path = %path.display(), "Loading credentials file");
        Self::from_file(&path)
    }
}

/// A parsed `googledrive://` URL
#[derive(Debug, Clone, PartialEq)]
pub struct DriveUrl {
    /// Directory to open, relative to the root; `/` for the root itself
    pub path: String,
    /// Credentials given in the URL; None means load them from the environment
    pub credentials: Option<Credentials>,
    pub root_id: Option<String>,
    pub drive_id: Option<String>,
}

impl DriveUrl {
    /// Parse `googledrive://[/]dir?access_token=..&root_id=..`
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| ConfigError::InvalidUrl(format!("expected {}...: {}", URL_SCHEME, url)))?;

        let (resource, query) = match rest.split_once('?') {
            Some((resource, query)) => (resource, Some(query)),
            None => (rest, None),
        };

        let resource = decode(resource)?;
        let path = if resource.starts_with('/') {
            resource
        } else {
            format!("/{}", resource)
        };

        let mut access_token = None;
        let mut refresh_token = None;
        let mut client_id = None;
        let mut client_secret = None;
        let mut root_id = None;
        let mut drive_id = None;

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode(value)?;
            match key {
                "access_token" => access_token = Some(value),
                "refresh_token" => refresh_token = Some(value),
                "client_id" => client_id = Some(value),
                "client_secret" => client_secret = Some(value),
                "root_id" => root_id = Some(value),
                "drive_id" => drive_id = Some(value),
                other => debug!(param = other, "Ignoring unknown URL parameter"),
            }
        }

        let credentials = access_token.map(|access_token| Credentials {
            access_token,
            refresh_token,
            client_id,
            client_secret,
        });

        Ok(Self {
            path,
            credentials,
            root_id,
            drive_id,
        })
    }

    /// Apply the URL's anchors to a base configuration
    pub fn apply(&self, mut config: DriveFsConfig) -> DriveFsConfig {
        if self.root_id.is_some() {
            config.root_id = self.root_id.clone();
        }
        if self.drive_id.is_some() {
            config.drive_id = self.drive_id.clone();
        }
        config
    }
}

fn decode(raw: &str) -> Result<String, ConfigError> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| ConfigError::InvalidUrl(format!("bad percent-encoding in {:?}: {}", raw, e)))
}
