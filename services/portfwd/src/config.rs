//! Forwarder configuration.
//!
//! Process settings come from the environment; the list of forwarded
//! address pairs comes from a JSON file:
//!
//! ```json
//! { "proxy_pairs": [ { "local_addr": "127.0.0.1:9001", "remote_addr": "127.0.0.1:9002" } ] }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default location of the pair list.
pub const DEFAULT_CONFIG_PATH: &str = "proxy.json";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Process configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the JSON pair list.
    pub config_path: PathBuf,

    /// Log level used when RUST_LOG is not set.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Write every relayed chunk to the log as hex.
    pub log_payload: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config_path = std::env::var("PORTFWD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let log_level = std::env::var("PORTFWD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match std::env::var("PORTFWD_LOG_FORMAT") {
            Ok(v) => parse_log_format(&v)
                .with_context(|| format!("PORTFWD_LOG_FORMAT must be json or compact, got {v}"))?,
            Err(_) => LogFormat::Json,
        };

        let log_payload = std::env::var("PORTFWD_LOG_PAYLOAD")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            config_path,
            log_level,
            log_format,
            log_payload,
        })
    }
}

fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.to_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "compact" | "text" => Some(LogFormat::Compact),
        _ => None,
    }
}

/// One forwarded (local, remote) pair, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPair {
    pub local_addr: String,
    pub remote_addr: String,
}

/// The pair list file.
///
/// Entries are kept as raw JSON so that one malformed entry does not
/// invalidate the others.
#[derive(Debug, Default, Deserialize)]
pub struct PairList {
    #[serde(default)]
    proxy_pairs: Vec<serde_json::Value>,
}

impl PairList {
    /// Load the pair list from `path`.
    ///
    /// If `path` cannot be read, its base name is tried relative to the
    /// working directory before giving up.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(primary) => {
                let base = path.file_name().map(Path::new).unwrap_or(path);
                fs::read_to_string(base).map_err(|fallback| ConfigError::Read {
                    path: path.to_path_buf(),
                    primary,
                    fallback,
                })?
            }
        };
        Self::parse(&data)
    }

    /// Parse a pair list from a JSON string.
    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Number of entries, valid or not.
    pub fn len(&self) -> usize {
        self.proxy_pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxy_pairs.is_empty()
    }

    /// Decode each entry independently, in file order.
    pub fn entries(&self) -> Vec<Result<ProxyPair, ConfigError>> {
        self.proxy_pairs
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                ProxyPair::deserialize(raw).map_err(|source| ConfigError::Entry { index, source })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_pair_list() {
        let list = PairList::parse(
            r#"{"proxy_pairs":[
                {"local_addr":"127.0.0.1:9001","remote_addr":"127.0.0.1:9002"},
                {"local_addr":"[::1]:7000","remote_addr":"localhost:7001"}
            ]}"#,
        )
        .unwrap();

        let pairs: Vec<_> = list.entries().into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].local_addr, "127.0.0.1:9001");
        assert_eq!(pairs[1].remote_addr, "localhost:7001");
    }

    #[test]
    fn malformed_entry_only_fails_itself() {
        let list = PairList::parse(
            r#"{"proxy_pairs":[
                {"local_addr":"127.0.0.1:9001"},
                {"local_addr":"127.0.0.1:9003","remote_addr":"127.0.0.1:9004"}
            ]}"#,
        )
        .unwrap();

        let entries = list.entries();
        assert!(matches!(entries[0], Err(ConfigError::Entry { index: 0, .. })));
        assert!(entries[1].is_ok());
    }

    #[test]
    fn malformed_json_is_fatal() {
        let err = PairList::parse("{\"proxy_pairs\": [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_list_is_empty() {
        let list = PairList::parse("{}").unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"proxy_pairs":[{{"local_addr":"127.0.0.1:1515","remote_addr":"127.0.0.1:1516"}}]}}"#
        )
        .unwrap();

        let list = PairList::load(file.path()).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn unreadable_file_reports_both_attempts() {
        let err = PairList::load(Path::new("/nonexistent/dir/portfwd-missing.json")).unwrap_err();
        match err {
            ConfigError::Read { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/dir/portfwd-missing.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn log_format_values() {
        assert_eq!(parse_log_format("JSON"), Some(LogFormat::Json));
        assert_eq!(parse_log_format("compact"), Some(LogFormat::Compact));
        assert_eq!(parse_log_format("xml"), None);
    }
}
