use serde::{Deserialize, Serialize};

use crate::error::{TransferError, TransferResult};

/// Top-level configuration (loaded from codedrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodedropConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub retention: RetentionConfig,
    pub crypto: CryptoConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API listen address (default: 127.0.0.1:8080)
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "s3" or "memory"
    pub backend: String,
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: auto)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

/// Limits applied when a transfer is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum plaintext size in bytes (default: 30 MiB)
    pub max_file_size_bytes: u64,
    /// Shortest accepted code (default: 4)
    pub min_code_len: usize,
    /// Longest accepted code (default: 8)
    pub max_code_len: usize,
    /// Furthest expiry accepted, in seconds from now (default: 7 days)
    pub max_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds between background sweeps; 0 disables the loop (default: 300)
    pub sweep_interval_secs: u64,
    /// Bearer token required by POST /cleanup when set
    pub cleanup_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iterations used when sealing (default: 210000, also
    /// the minimum). Stored with each transfer; recipients derive with the
    /// sender's count.
    pub pbkdf2_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the codedropd API
    pub server_url: String,
    /// Transfer lifetime used by `codedrop send` (default: 600)
    pub default_ttl_secs: u64,
    /// Digits in generated codes (default: 6)
    pub code_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "s3".into(),
            endpoint: "http://localhost:9000".into(),
            region: "auto".into(),
            bucket: "codedrop".into(),
            enforce_tls: false,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 30 * 1024 * 1024,
            min_code_len: 4,
            max_code_len: 8,
            max_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            cleanup_secret: None,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: codedrop_crypto::DEFAULT_ITERATIONS,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            default_ttl_secs: 600,
            code_length: codedrop_crypto::DEFAULT_CODE_LEN,
        }
    }
}

impl CryptoConfig {
    pub fn kdf_params(&self) -> codedrop_crypto::KdfParams {
        codedrop_crypto::KdfParams {
            iterations: self.pbkdf2_iterations,
        }
    }
}

impl CodedropConfig {
    /// Parse a TOML document; missing sections take their defaults.
    pub fn from_toml(text: &str) -> TransferResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| TransferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would weaken the protocol or can never be satisfied.
    pub fn validate(&self) -> TransferResult<()> {
        let bad = |msg: String| Err(TransferError::Config(msg));

        if !matches!(self.storage.backend.as_str(), "s3" | "memory") {
            return bad(format!(
                "storage.backend must be \"s3\" or \"memory\", got {:?}",
                self.storage.backend
            ));
        }
        let iterations = self.crypto.pbkdf2_iterations;
        if !(codedrop_crypto::DEFAULT_ITERATIONS..=codedrop_crypto::MAX_ITERATIONS).contains(&iterations) {
            return bad(format!(
                "crypto.pbkdf2_iterations must be between {} and {}",
                codedrop_crypto::DEFAULT_ITERATIONS,
                codedrop_crypto::MAX_ITERATIONS
            ));
        }
        let t = &self.transfer;
        if t.min_code_len == 0 || t.min_code_len > t.max_code_len {
            return bad(format!(
                "transfer code length bounds are inconsistent: {}..={}",
                t.min_code_len, t.max_code_len
            ));
        }
        if t.max_file_size_bytes == 0 {
            return bad("transfer.max_file_size_bytes must be positive".into());
        }
        if t.max_ttl_secs == 0 {
            return bad("transfer.max_ttl_secs must be positive".into());
        }
        let c = &self.client;
        if c.code_length < t.min_code_len || c.code_length > t.max_code_len {
            return bad(format!(
                "client.code_length {} is outside {}..={}",
                c.code_length, t.min_code_len, t.max_code_len
            ));
        }
        Ok(())
    }
}
