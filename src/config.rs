use crate::services::file_service::{DEFAULT_CONTENT_TYPES, FileServiceConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub allowed_content_types: Vec<String>,
    pub io_timeout_ms: u64,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File upload and metadata service")]
pub struct Args {
    /// Host to bind to (overrides FILE_RECEIVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_RECEIVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where file payloads are stored (overrides FILE_RECEIVER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_RECEIVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Accepted upload media type, repeatable (overrides FILE_RECEIVER_ALLOWED_CONTENT_TYPES)
    #[arg(long = "allowed-content-type")]
    pub allowed_content_types: Vec<String>,

    /// Timeout for a single storage call in milliseconds (overrides FILE_RECEIVER_IO_TIMEOUT_MS)
    #[arg(long)]
    pub io_timeout_ms: Option<u64>,

    /// Largest accepted request body in bytes (overrides FILE_RECEIVER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |key| env::var(key))?, migrate))
    }

    /// Merge CLI args over values looked up through `var`, then defaults.
    fn merge(
        args: Args,
        var: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = var("FILE_RECEIVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&var, "FILE_RECEIVER_PORT", 3000)?;
        let env_storage =
            var("FILE_RECEIVER_STORAGE_DIR").unwrap_or_else(|_| "./data/files".into());
        let env_db = var("FILE_RECEIVER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/files.db".into());
        let env_types = match var("FILE_RECEIVER_ALLOWED_CONTENT_TYPES") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
        };
        let env_timeout = parse_var(&var, "FILE_RECEIVER_IO_TIMEOUT_MS", 5000)?;
        let env_max_upload = parse_var(&var, "FILE_RECEIVER_MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            allowed_content_types: if args.allowed_content_types.is_empty() {
                env_types
            } else {
                args.allowed_content_types
            },
            io_timeout_ms: args.io_timeout_ms.unwrap_or(env_timeout),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        if cfg.allowed_content_types.is_empty() {
            anyhow::bail!("at least one allowed content type is required");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The subset of settings owned by `FileService`.
    pub fn file_service(&self) -> FileServiceConfig {
        FileServiceConfig {
            allowed_content_types: self.allowed_content_types.clone(),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Result<String, env::VarError>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
