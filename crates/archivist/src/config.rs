//! Service configuration.
//!
//! Loaded once from TOML at startup, validated, then passed by reference to
//! the components that need it.
//!
//! ```toml
//! [folder]
//! root = "/srv/incoming"
//! file_extensions = ["jpg", "png", "tiff"]
//!
//! [upload]
//! backend = "w3"
//! target = "archive-space"
//! ```

use crate::filter::ExtensionFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when `--config` is not given.
pub const CONFIG_ENV: &str = "ARCHIVIST_CONFIG";
/// Fallback location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/archivist/config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub folder: FolderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Watched directory. Canonicalized by [`Config::validate`].
    pub root: PathBuf,
    pub file_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// web3.storage through the `w3` CLI
    W3,
    /// CAR files on a local or mounted filesystem
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub backend: BackendKind,
    /// Space (w3) or subdirectory (local) every upload goes to.
    pub target: String,
    #[serde(default = "default_w3_bin")]
    pub w3_bin: PathBuf,
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl UploadConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub reconcile_stuck_uploads: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            settle_ms: default_settle_ms(),
            reconcile_stuck_uploads: false,
        }
    }
}

impl PipelineConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    archivist_logging::archivist_home().join("status.sqlite3")
}

fn default_max_connections() -> u32 {
    5
}

fn default_w3_bin() -> PathBuf {
    PathBuf::from("w3")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_settle_ms() -> u64 {
    250
}

fn default_webhook_timeout() -> u64 {
    10
}

/// Resolve the config file location.
///
/// Priority:
/// 1. `--config` on the command line
/// 2. `$ARCHIVIST_CONFIG`
/// 3. `/etc/archivist/config.toml`
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating. Validation touches the filesystem.
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Check cross-field constraints and canonicalize the watched root.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let root = &self.folder.root;
        let meta = std::fs::metadata(root).map_err(|e| {
            ConfigError::Invalid(format!("folder.root {}: {}", root.display(), e))
        })?;
        if !meta.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "folder.root {} is not a directory",
                root.display()
            )));
        }
        self.folder.root = std::fs::canonicalize(root).map_err(|e| {
            ConfigError::Invalid(format!("folder.root {}: {}", root.display(), e))
        })?;
        if self.folder.root.to_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "folder.root {} is not valid UTF-8",
                self.folder.root.display()
            )));
        }

        if self.extension_filter().is_empty() {
            return Err(ConfigError::Invalid(
                "folder.file_extensions must name at least one extension".to_string(),
            ));
        }

        if self.upload.target.trim().is_empty() {
            return Err(ConfigError::Invalid("upload.target must not be empty".to_string()));
        }
        if self.upload.backend == BackendKind::Local && self.upload.local_dir.is_none() {
            return Err(ConfigError::Invalid(
                "upload.local_dir is required for the local backend".to_string(),
            ));
        }
        if self.upload.max_attempts == 0 {
            return Err(ConfigError::Invalid("upload.max_attempts must be at least 1".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.pipeline.workers == 0 || self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.workers and pipeline.queue_capacity must be at least 1".to_string(),
            ));
        }

        if let Some(webhook) = &self.webhook {
            if !(webhook.url.starts_with("http://") || webhook.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "webhook.url must be an http(s) URL, got '{}'",
                    webhook.url
                )));
            }
        }
        Ok(())
    }

    pub fn extension_filter(&self) -> ExtensionFilter {
        ExtensionFilter::new(&self.folder.file_extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal(root: &Path) -> String {
        format!(
            r#"
[folder]
root = "{}"
file_extensions = ["jpg", ".PNG"]

[upload]
backend = "w3"
target = "archive"
"#,
            root.display()
        )
    }

    #[test]
    fn test_defaults_applied() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::from_toml(&minimal(tmp.path())).unwrap();
        config.validate().unwrap();

        assert_eq!(config.database.max_connections, 5);
        assert!(config.database.path.ends_with("status.sqlite3"));
        assert_eq!(config.upload.w3_bin, PathBuf::from("w3"));
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.retry_backoff(), Duration::from_millis(500));
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.queue_capacity, 256);
        assert_eq!(config.pipeline.settle(), Duration::from_millis(250));
        assert!(!config.pipeline.reconcile_stuck_uploads);
        assert!(config.webhook.is_none());
        assert!(config.extension_filter().matches(Path::new("x.png")));
    }

    #[test]
    fn test_root_is_canonicalized() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("inbox")).unwrap();
        let dotted = tmp.path().join("inbox").join("..").join("inbox");

        let mut config = Config::from_toml(&minimal(&dotted)).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.folder.root,
            std::fs::canonicalize(tmp.path().join("inbox")).unwrap()
        );
    }

    #[test]
    fn test_missing_root_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::from_toml(&minimal(&tmp.path().join("nope"))).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_local_backend_requires_dir() {
        let tmp = TempDir::new().unwrap();
        let raw = minimal(tmp.path()).replace("backend = \"w3\"", "backend = \"local\"");
        let mut config = Config::from_toml(&raw).unwrap();
        assert_eq!(config.upload.backend, BackendKind::Local);
        assert!(config.validate().is_err());

        config.upload.local_dir = Some(tmp.path().join("store"));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_backend_fails_to_parse() {
        let tmp = TempDir::new().unwrap();
        let raw = minimal(tmp.path()).replace("backend = \"w3\"", "backend = \"s3\"");
        assert!(Config::from_toml(&raw).is_err());
    }

    #[test]
    fn test_webhook_section() {
        let tmp = TempDir::new().unwrap();
        let raw = format!(
            "{}\n[webhook]\nurl = \"https://hooks.example.com/archived\"\n",
            minimal(tmp.path())
        );
        let mut config = Config::from_toml(&raw).unwrap();
        config.validate().unwrap();
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.timeout_secs, 10);

        let bad = format!("{}\n[webhook]\nurl = \"ftp://nope\"\n", minimal(tmp.path()));
        let mut config = Config::from_toml(&bad).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[folder\n").unwrap();
        match Config::load(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_prefers_cli() {
        let explicit = Path::new("/tmp/explicit.toml");
        assert_eq!(resolve_config_path(Some(explicit)), explicit);
    }
}
