//! Explicit configuration threaded into every accepter and connector.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GensioError, Result};

/// Defaults for the multiplexing stage when the descriptor omits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxDefaults {
    /// Largest payload carried by one mux frame.
    pub chunksize: usize,
    /// Maximum number of open channels per session.
    pub max_channels: u16,
    /// Bytes a peer may send on one channel before the reader catches up.
    pub window: u32,
}

impl Default for MuxDefaults {
    fn default() -> Self {
        Self {
            chunksize: 4096,
            max_channels: 256,
            window: 256 * 1024,
        }
    }
}

/// Configuration shared by the stages of one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Transport connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-filter handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Whether to enable TCP_NODELAY on stream transports.
    pub nodelay: bool,
    /// Backlog passed to listen(2).
    pub listen_backlog: u32,
    /// Default read size for [`crate::Gensio::read`].
    pub read_buffer_size: usize,
    /// Depth of the queue of established connections awaiting `accept`.
    pub accept_queue_depth: usize,
    /// Base directory for relative key, certificate and CA paths.
    pub key_dir: Option<PathBuf>,
    /// Multiplexer defaults.
    pub mux: MuxDefaults,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 10_000,
            nodelay: true,
            listen_backlog: 128,
            read_buffer_size: 8192,
            accept_queue_depth: 16,
            key_dir: None,
            mux: MuxDefaults::default(),
        }
    }
}

impl StackConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| GensioError::Config(e.to_string())),
            "json" => {
                serde_json::from_str(&contents).map_err(|e| GensioError::Config(e.to_string()))
            }
            _ => Err(GensioError::Config(format!(
                "unsupported config file extension: {}",
                ext
            ))),
        }
    }

    /// Sets the directory relative key paths resolve against.
    pub fn with_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = Some(dir.into());
        self
    }

    /// [`Self::connect_timeout_ms`] as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// [`Self::handshake_timeout_ms`] as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Resolves a key/certificate path from a descriptor parameter.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.key_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = StackConfig::default();
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert!(config.nodelay);
        assert_eq!(config.mux.chunksize, 4096);
        assert_eq!(config.mux.max_channels, 256);
        assert_eq!(config.mux.window, 256 * 1024);
        assert!(config.key_dir.is_none());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
connect_timeout_ms = 1500
nodelay = false
key_dir = "/etc/gensio/keys"

[mux]
chunksize = 64
            "#
        )
        .unwrap();

        let config = StackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connect_timeout_ms, 1500);
        assert!(!config.nodelay);
        assert_eq!(config.key_dir, Some(PathBuf::from("/etc/gensio/keys")));
        assert_eq!(config.mux.chunksize, 64);
        assert_eq!(config.mux.max_channels, 256);
        assert_eq!(config.handshake_timeout_ms, 10_000);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{ "handshake_timeout_ms": 250, "read_buffer_size": 512 }}"#).unwrap();

        let config = StackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.handshake_timeout_ms, 250);
        assert_eq!(config.read_buffer_size, 512);
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let err = StackConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, GensioError::Config(_)));
    }

    #[test]
    fn test_resolve_path() {
        let config = StackConfig::default().with_key_dir("/keys");
        assert_eq!(config.resolve_path("cert.pem"), PathBuf::from("/keys/cert.pem"));
        assert_eq!(config.resolve_path("/abs/cert.pem"), PathBuf::from("/abs/cert.pem"));
        let config = StackConfig::default();
        assert_eq!(config.resolve_path("cert.pem"), PathBuf::from("cert.pem"));
    }
}
