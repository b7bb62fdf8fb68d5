//! codedrop: send and receive files through a codedropd server
//!
//! Commands:
//!   send <file>          - encrypt locally under a code, upload, print the code
//!   info <code>          - show name, type, size and expiry of a transfer
//!   receive <code>       - download and decrypt a transfer
//!   purge                - ask the server to delete expired transfers
//!   code                 - print a fresh random code
//!   config show          - display current configuration

mod client;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use codedrop_core::config::CodedropConfig;
use codedrop_core::{TransferCode, UploadPayload};
use codedrop_crypto::{generate_code, open, seal, CryptoError};

use client::{server_status, ApiClient};

/// Fresh codes tried by `send` when a generated one is already taken.
const MAX_CODE_ATTEMPTS: usize = 3;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "codedrop",
    version,
    about = "codedrop file transfer client",
    long_about = "codedrop: hand a file to someone with a short code; the server only ever sees ciphertext"
)]
struct Cli {
    /// Path to codedrop.toml configuration file
    #[arg(long, short = 'c', env = "CODEDROP_CONFIG", default_value = "~/.config/codedrop/config.toml")]
    config: PathBuf,

    /// codedropd base URL (overrides client.server_url)
    #[arg(long, short = 's', env = "CODEDROP_SERVER")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file and upload it; prints the code to share
    Send {
        /// File to send
        file: PathBuf,
        /// Use this code instead of generating one
        #[arg(long)]
        code: Option<String>,
        /// Seconds until the transfer expires (default: client.default_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
        /// MIME type to record (default: application/octet-stream)
        #[arg(long = "type")]
        file_type: Option<String>,
    },

    /// Show what a code refers to, without downloading it
    Info {
        code: String,
    },

    /// Download and decrypt a transfer
    Receive {
        code: String,
        /// Output path (default: the sender's file name, in the current dir)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Overwrite the output file if it exists
        #[arg(long)]
        force: bool,
    },

    /// Delete every expired transfer on the server
    Purge {
        /// Bearer token expected by the server's /cleanup endpoint
        #[arg(long, env = "CODEDROP_CLEANUP_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },

    /// Print a fresh random code
    Code {
        /// Number of digits (default: client.code_length)
        #[arg(long, short = 'n')]
        length: Option<usize>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;
    let server = cli
        .server
        .clone()
        .unwrap_or_else(|| config.client.server_url.clone());

    match cli.command {
        Commands::Send { file, code, ttl, file_type } => {
            cmd_send(&config, &server, &file, code, ttl, file_type.as_deref()).await
        }
        Commands::Info { code } => cmd_info(&config, &server, &code).await,
        Commands::Receive { code, output, force } => {
            cmd_receive(&config, &server, &code, output.as_deref(), force).await
        }
        Commands::Purge { secret } => cmd_purge(&server, secret.as_deref()).await,
        Commands::Code { length } => cmd_code(&config, length),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<CodedropConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        CodedropConfig::from_toml(&content)
            .with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(CodedropConfig::default())
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `codedrop send` ───────────────────────────────────────────────────────────

async fn cmd_send(
    config: &CodedropConfig,
    server: &str,
    file: &Path,
    code: Option<String>,
    ttl: Option<u64>,
    file_type: Option<&str>,
) -> Result<()> {
    let limits = &config.transfer;

    if let Some(code) = &code {
        parse_code(config, code)?;
    }

    let plaintext = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let size = plaintext.len() as u64;
    if size > limits.max_file_size_bytes {
        anyhow::bail!(
            "{} is {}; the limit is {}",
            file.display(),
            fmt_bytes(size),
            fmt_bytes(limits.max_file_size_bytes)
        );
    }

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("sending a file requires a file name")?;
    let file_type = file_type.unwrap_or("application/octet-stream");
    let ttl = ttl.unwrap_or(config.client.default_ttl_secs);
    let expires_at = expiry_after(Utc::now(), ttl)?;

    let api = ApiClient::new(server)?;
    let chosen = code.is_some();
    let params = config.crypto.kdf_params();

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = code
            .clone()
            .unwrap_or_else(|| generate_code(config.client.code_length));

        let pb = make_spinner("send");
        pb.set_message(format!("encrypting {file_name}..."));
        let sealed = {
            let plaintext = plaintext.clone();
            let code = SecretString::from(code.clone());
            let params = params.clone();
            tokio::task::spawn_blocking(move || seal(&plaintext, &code, &params))
                .await
                .context("encryption task")?
                .context("encrypting file")?
        };

        pb.set_message(format!("uploading {}...", fmt_bytes(sealed.ciphertext.len() as u64)));
        let payload =
            UploadPayload::from_sealed(&code, &file_name, file_type, size, expires_at, &sealed);
        match api.create(&payload).await {
            Ok(()) => {
                pb.finish_and_clear();
                println!("Sent {} ({})", file_name, fmt_bytes(size));
                println!("  code:    {code}");
                println!("  expires: {}", expires_at.to_rfc3339());
                return Ok(());
            }
            Err(e) if !chosen && server_status(&e) == Some(StatusCode::CONFLICT) => {
                pb.finish_and_clear();
                tracing::debug!(attempt, "generated code already in use, retrying");
            }
            Err(e) => {
                pb.abandon_with_message("failed");
                return Err(e).context("uploading transfer");
            }
        }
    }

    anyhow::bail!("no free code after {MAX_CODE_ATTEMPTS} attempts; try a longer --code")
}

/// Reject anything that is not a well-formed code before it reaches a URL.
fn parse_code(config: &CodedropConfig, code: &str) -> Result<TransferCode> {
    let limits = &config.transfer;
    TransferCode::new(code, limits.min_code_len, limits.max_code_len).with_context(|| {
        format!(
            "code must be {}-{} letters or digits",
            limits.min_code_len, limits.max_code_len
        )
    })
}

fn expiry_after(now: DateTime<Utc>, ttl_secs: u64) -> Result<DateTime<Utc>> {
    if ttl_secs == 0 {
        anyhow::bail!("--ttl must be at least one second");
    }
    i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|d| now.checked_add_signed(d))
        .context("--ttl is out of range")
}

// ── `codedrop info` ───────────────────────────────────────────────────────────

async fn cmd_info(config: &CodedropConfig, server: &str, code: &str) -> Result<()> {
    let code = parse_code(config, code)?;
    let api = ApiClient::new(server)?;
    let summary = api.describe(&code).await.map_err(explain)?;

    println!("File: {}", summary.file_name);
    println!("  type:    {}", summary.file_type);
    println!("  size:    {}", fmt_bytes(summary.file_size));
    println!("  expires: {}", summary.expires_at.to_rfc3339());
    Ok(())
}

// ── `codedrop receive` ────────────────────────────────────────────────────────

async fn cmd_receive(
    config: &CodedropConfig,
    server: &str,
    code: &str,
    output: Option<&Path>,
    force: bool,
) -> Result<()> {
    let transfer_code = parse_code(config, code)?;
    let api = ApiClient::new(server)?;

    let summary = api.describe(&transfer_code).await.map_err(explain)?;
    let out = match output {
        Some(p) => p.to_path_buf(),
        None => safe_file_name(&summary.file_name),
    };
    if out.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", out.display());
    }

    let pb = make_spinner("receive");
    pb.set_message(format!("downloading {}...", fmt_bytes(summary.file_size)));
    let downloaded = match api.download(&transfer_code).await {
        Ok(d) => d,
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(explain(e));
        }
    };

    pb.set_message("decrypting...".to_string());
    let plaintext = {
        let code = SecretString::from(code.to_string());
        tokio::task::spawn_blocking(move || {
            open(&downloaded.ciphertext, &downloaded.key_material, &code)
        })
        .await
        .context("decryption task")?
    };
    let plaintext = match plaintext {
        Ok(p) => p,
        Err(CryptoError::DecryptionFailed) => {
            pb.abandon_with_message("failed");
            anyhow::bail!("decryption failed: wrong code or corrupted transfer");
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            return Err(e).context("decrypting transfer");
        }
    };

    tokio::fs::write(&out, &plaintext)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    pb.finish_and_clear();

    println!("Received {}", summary.file_name);
    println!("  local: {}", out.display());
    println!("  bytes: {}", fmt_bytes(plaintext.len() as u64));
    Ok(())
}

/// Only the final path component of a sender-chosen name, never `..` or empty.
fn safe_file_name(name: &str) -> PathBuf {
    Path::new(name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("codedrop-download"))
}

/// Turn lookup statuses into the sentence a recipient needs.
fn explain(err: anyhow::Error) -> anyhow::Error {
    match server_status(&err) {
        Some(StatusCode::NOT_FOUND) => err.context("no transfer exists for this code"),
        Some(StatusCode::GONE) => err.context("this transfer has expired"),
        _ => err,
    }
}

// ── `codedrop purge` ──────────────────────────────────────────────────────────

async fn cmd_purge(server: &str, secret: Option<&str>) -> Result<()> {
    let api = ApiClient::new(server)?;
    let report = api.cleanup(secret).await.context("requesting cleanup")?;

    println!("Cleanup complete:");
    println!("  checked: {}", report.checked);
    println!("  deleted: {}", report.deleted);
    println!("  failed:  {}", report.failed);
    Ok(())
}

// ── `codedrop code` ───────────────────────────────────────────────────────────

fn cmd_code(config: &CodedropConfig, length: Option<usize>) -> Result<()> {
    let len = length.unwrap_or(config.client.code_length);
    let limits = &config.transfer;
    if len < limits.min_code_len || len > limits.max_code_len {
        anyhow::bail!(
            "code length must be between {} and {}",
            limits.min_code_len,
            limits.max_code_len
        );
    }
    println!("{}", generate_code(len));
    Ok(())
}

// ── `codedrop config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &CodedropConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let mut shown = config.clone();
    if shown.retention.cleanup_secret.is_some() {
        shown.retention.cleanup_secret = Some("[REDACTED]".into());
    }
    let rendered = toml::to_string_pretty(&shown).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
