use h2gate_tls::TicketCipher;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Worker-process configuration
///
/// The supervising parent reads the full proxy configuration; the subset
/// below is what the worker process consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of worker threads. 1 runs a single in-process worker on the
    /// control loop; higher values spawn that many threads, each with its
    /// own event loop.
    #[serde(default = "default_num_worker")]
    pub num_worker: usize,

    /// User to run as after the listening sockets have been set up.
    /// Only honored when the process starts with root privileges.
    #[serde(default)]
    pub user: Option<String>,

    /// Backend address connections are relayed to.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Disable TLS on the client-facing side. Ticket key management is
    /// skipped entirely when set.
    #[serde(default)]
    pub upstream_no_tls: bool,

    /// Skip triggering OCSP response refreshes.
    #[serde(default)]
    pub no_ocsp: bool,

    /// Cipher for session-ticket encryption (default: aes-128-cbc).
    #[serde(default)]
    pub tls_ticket_key_cipher: TicketCipher,

    /// True when the cipher was given explicitly rather than defaulted.
    #[serde(default)]
    pub tls_ticket_key_cipher_given: bool,

    /// Pre-shared ticket key files, first file first. When non-empty,
    /// automatic rotation is disabled.
    #[serde(default)]
    pub tls_ticket_key_files: Vec<PathBuf>,

    /// Remote cache host for fleet-wide ticket keys. Presence selects
    /// remote fetching over local rotation.
    #[serde(default)]
    pub tls_ticket_key_memcached_host: Option<String>,

    /// Seconds between remote ticket key fetches (default: 600).
    #[serde(default = "default_memcached_interval_secs")]
    pub tls_ticket_key_memcached_interval_secs: u64,

    /// TLS session timeout in seconds (default: 12 hours). Determines how
    /// many rotated keys are retained for decryption.
    #[serde(default = "default_session_timeout_secs")]
    pub tls_session_timeout_secs: u64,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    /// Error log file path. When set, stderr is redirected there and the
    /// file is reopened on the REOPEN_LOG command.
    #[serde(default)]
    pub error_log: Option<PathBuf>,
}

fn default_num_worker() -> usize {
    1
}

fn default_backend() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_memcached_interval_secs() -> u64 {
    600
}

fn default_session_timeout_secs() -> u64 {
    12 * 3600
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_worker: default_num_worker(),
            user: None,
            backend: default_backend(),
            upstream_no_tls: false,
            no_ocsp: false,
            tls_ticket_key_cipher: TicketCipher::default(),
            tls_ticket_key_cipher_given: false,
            tls_ticket_key_files: Vec::new(),
            tls_ticket_key_memcached_host: None,
            tls_ticket_key_memcached_interval_secs: default_memcached_interval_secs(),
            tls_session_timeout_secs: default_session_timeout_secs(),
            log_level: None,
            error_log: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_worker == 0 {
            return Err(ConfigError::Invalid(
                "num_worker must be at least 1".to_string(),
            ));
        }
        if self.backend.is_empty() {
            return Err(ConfigError::Invalid("backend must not be empty".to_string()));
        }
        if self.tls_session_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "tls_session_timeout_secs must be positive".to_string(),
            ));
        }
        if self.tls_ticket_key_memcached_host.is_some() && !self.tls_ticket_key_files.is_empty() {
            return Err(ConfigError::Invalid(
                "tls_ticket_key_files and tls_ticket_key_memcached_host are mutually exclusive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_session_timeout_secs)
    }

    pub fn memcached_interval(&self) -> Duration {
        Duration::from_secs(self.tls_ticket_key_memcached_interval_secs)
    }
}

/// Descriptors inherited from the supervising parent.
///
/// The parent binds the listening sockets and opens the IPC pipe before
/// forking; the worker receives the descriptor numbers on its command line.
/// Any negative value means the descriptor is absent (the listeners are
/// optional; the IPC descriptor is not).
#[derive(Debug, Clone, Copy)]
pub struct WorkerProcessConfig {
    /// IPv4 listening socket, or a negative value when absent.
    pub server_fd: RawFd,
    /// IPv6 listening socket, or a negative value when absent.
    pub server_fd6: RawFd,
    /// Read end of the lifecycle IPC channel; the parent holds the write end.
    pub ipc_fd: RawFd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.num_worker, 1);
        assert_eq!(config.tls_ticket_key_cipher, TicketCipher::Aes128Cbc);
        assert_eq!(config.session_timeout(), Duration::from_secs(12 * 3600));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_minimal() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.num_worker, 1);
        assert!(!config.upstream_no_tls);
        assert!(config.tls_ticket_key_memcached_host.is_none());
    }

    #[test]
    fn test_parse_full() {
        let config: Config = serde_json::from_str(
            r#"{
                "num_worker": 4,
                "user": "nobody",
                "backend": "10.0.0.1:3000",
                "tls_ticket_key_cipher": "aes-256-cbc",
                "tls_ticket_key_cipher_given": true,
                "tls_session_timeout_secs": 7200
            }"#,
        )
        .unwrap();

        assert_eq!(config.num_worker, 4);
        assert_eq!(config.user.as_deref(), Some("nobody"));
        assert_eq!(config.tls_ticket_key_cipher, TicketCipher::Aes256Cbc);
        assert_eq!(config.session_timeout(), Duration::from_secs(7200));
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = Config {
            num_worker: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_files_and_memcached_exclusive() {
        let config = Config {
            tls_ticket_key_files: vec![PathBuf::from("/etc/h2gate/ticket.key")],
            tls_ticket_key_memcached_host: Some("cache.internal".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
