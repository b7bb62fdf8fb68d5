//! codedropd: code-keyed encrypted file transfer daemon
//!
//! Usage:
//!   codedropd [--config /etc/codedrop/config.toml] [--mode serve|sweep]
//!
//! Modes:
//!   serve  - HTTP API + periodic retention sweeps + metrics [default]
//!   sweep  - Run one retention sweep and exit (cron / k8s CronJob)

mod api;
mod daemon;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use codedrop_core::config::CodedropConfig;
use codedrop_storage::S3Credentials;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "codedropd", version, about = "codedrop transfer daemon")]
struct Cli {
    /// Path to codedrop.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CODEDROP_CONFIG",
        default_value = "/etc/codedrop/config.toml"
    )]
    config: PathBuf,

    /// Daemon mode
    #[arg(long, default_value = "serve")]
    mode: Mode,

    /// Log level (trace, debug, info, warn, error); overrides server.log_level
    #[arg(long, env = "CODEDROP_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides server.log_format
    #[arg(long, env = "CODEDROP_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// S3 access key
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    access_key_id: Option<String>,

    /// S3 secret key
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: Option<String>,

    /// Bearer token for POST /cleanup; overrides retention.cleanup_secret
    #[arg(long, env = "CODEDROP_CLEANUP_SECRET", hide_env_values = true)]
    cleanup_secret: Option<String>,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum Mode {
    /// HTTP API with background sweeps (default)
    Serve,
    /// Single retention sweep, then exit
    Sweep,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first so its log settings apply; warn about a missing file
    // once logging is up.
    let loaded = load_config(&cli.config).await?;
    let missing = loaded.is_none();
    let config = loaded.unwrap_or_default();

    let level = cli.log.as_deref().unwrap_or(&config.server.log_level);
    let format = match &cli.log_format {
        Some(f) => f.clone(),
        None => LogFormat::from_str(&config.server.log_format, true)
            .map_err(|e| anyhow::anyhow!("server.log_format: {e}"))?,
    };
    init_logging(level, &format);

    if missing {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?cli.mode,
        config = %cli.config.display(),
        "codedropd starting"
    );

    let credentials = s3_credentials(cli.access_key_id, cli.secret_access_key);

    match cli.mode {
        Mode::Serve => {
            let cleanup_secret = cli
                .cleanup_secret
                .or_else(|| config.retention.cleanup_secret.clone())
                .filter(|s| !s.is_empty())
                .map(SecretString::from);
            daemon::run(config, credentials, cleanup_secret).await
        }
        Mode::Sweep => {
            let report = daemon::sweep_once(config, credentials).await?;
            println!("{}", serde_json::to_string(&report)?);
            Ok(())
        }
    }
}

fn s3_credentials(
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
) -> Option<S3Credentials> {
    match (access_key_id, secret_access_key) {
        (Some(id), Some(secret)) => Some(S3Credentials {
            access_key_id: id,
            secret_access_key: SecretString::from(secret),
        }),
        _ => None,
    }
}

/// `Ok(None)` when the file does not exist.
async fn load_config(path: &Path) -> Result<Option<CodedropConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = CodedropConfig::from_toml(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(config))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
