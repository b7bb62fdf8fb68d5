//! OpenDAL Operator factory for codedrop storage backends

use anyhow::{Context, Result};
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};

/// Minimal config needed to build an S3 operator
/// (full config lives in codedrop-core's StorageConfig)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// S3 credentials, usually from AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Build an OpenDAL Operator for any S3-compatible endpoint (R2, MinIO, AWS)
pub fn build_operator(cfg: &StorageConfig) -> Result<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// In-process operator. Contents vanish with the process; used by tests and
/// the `memory` backend.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish())
}

/// Build an operator from codedrop-core config.
///
/// For the `s3` backend, credentials are required. If `enforce_tls` is true
/// and the endpoint uses HTTP, this returns an error. Otherwise, a warning is
/// logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &codedrop_core::config::StorageConfig,
    credentials: Option<&S3Credentials>,
) -> Result<Operator> {
    if storage.backend == "memory" {
        tracing::warn!("using in-memory storage: transfers do not survive a restart");
        return memory_operator();
    }

    let creds = credentials.context(
        "S3 backend needs credentials: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
    )?;

    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP: credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    build_operator(&StorageConfig {
        endpoint: storage.endpoint.clone(),
        region: storage.region.clone(),
        bucket: storage.bucket.clone(),
        access_key_id: creds.access_key_id.clone(),
        secret_access_key: creds.secret_access_key.expose_secret().to_string(),
    })
}
