use crate::services::{
    fingerprint::{HEAD_SAMPLE_BYTES, TAIL_SAMPLE_BYTES},
    retry::RetryPolicy,
};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Deserialize;
use std::{collections::BTreeMap, env, fmt::Display, path::Path, str::FromStr, time::Duration};
use url::Url;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub accounts_file: Option<String>,
    /// Periodic scan cadence; zero disables the periodic scan.
    pub scan_interval: Duration,
    /// Wall-clock ceiling for a whole scan run.
    pub scan_timeout: Duration,
    pub scan: ScanSettings,
    pub retry: RetryPolicy,
    pub strict_approvals: bool,
}

/// Per-run tuning for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    /// Objects processed per chunk.
    pub chunk_size: usize,
    /// Safety cap on objects returned by a single listing.
    pub listing_cap: usize,
    pub head_sample_bytes: u64,
    pub tail_sample_bytes: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            listing_cap: 10_000,
            head_sample_bytes: HEAD_SAMPLE_BYTES,
            tail_sample_bytes: TAIL_SAMPLE_BYTES,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object storage discovery and approval service")]
pub struct Args {
    /// Host to bind to (overrides DISCOVERY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DISCOVERY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DISCOVERY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// TOML file listing storage accounts to scan (overrides DISCOVERY_ACCOUNTS_FILE)
    #[arg(long)]
    pub accounts_file: Option<String>,

    /// Seconds between periodic scans, 0 disables (overrides DISCOVERY_SCAN_INTERVAL_SECS)
    #[arg(long)]
    pub scan_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup` (the environment in
    /// production), falling back to defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("DISCOVERY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_or(&lookup, "DISCOVERY_PORT", 3000u16)?;
        let env_db = lookup("DISCOVERY_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/discovery.db".into());
        let env_interval = parse_or(&lookup, "DISCOVERY_SCAN_INTERVAL_SECS", 300u64)?;

        let defaults = ScanSettings::default();
        let scan = ScanSettings {
            chunk_size: parse_or(&lookup, "DISCOVERY_CHUNK_SIZE", defaults.chunk_size)?.max(1),
            listing_cap: parse_or(&lookup, "DISCOVERY_LISTING_CAP", defaults.listing_cap)?,
            ..defaults
        };

        // 0 means unlimited attempts (bounded only by the time ceiling).
        let max_attempts = parse_or(&lookup, "DB_RETRY_MAX_ATTEMPTS", 20u32)?;
        let retry = RetryPolicy {
            max_retries: (max_attempts > 0).then_some(max_attempts),
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                "DISCOVERY_RETRY_BASE_DELAY_MS",
                1_000u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                &lookup,
                "DISCOVERY_RETRY_MAX_DELAY_MS",
                60_000u64,
            )?),
            max_total_time: Duration::from_secs(parse_or(
                &lookup,
                "DISCOVERY_RETRY_MAX_TOTAL_SECS",
                3_600u64,
            )?),
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            accounts_file: args.accounts_file.or_else(|| lookup("DISCOVERY_ACCOUNTS_FILE")),
            scan_interval: Duration::from_secs(args.scan_interval_secs.unwrap_or(env_interval)),
            scan_timeout: Duration::from_secs(parse_or(
                &lookup,
                "DISCOVERY_SCAN_TIMEOUT_SECS",
                7_200u64,
            )?),
            scan,
            retry,
            strict_approvals: parse_or(&lookup, "DISCOVERY_STRICT_APPROVALS", false)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", key, value, err)),
        None => Ok(default),
    }
}

/// Storage accounts to scan. Immutable once loaded and shared by every run.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// One storage account: where it lives and which scopes to walk.
#[derive(Deserialize, Debug, Clone)]
pub struct AccountConfig {
    pub name: String,
    /// Storage DSN: `file:///path`, `memory://`, or `az://<account>`.
    pub dsn: String,
    /// Overrides the storage type derived from the DSN scheme.
    #[serde(default)]
    pub storage_type: Option<String>,
    pub containers: Vec<String>,
    /// Folder prefixes inside each container; empty scans the root.
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_env_type")]
    pub env_type: String,
    #[serde(default = "default_data_source_type")]
    pub data_source_type: String,
    /// Allow-list of extensions (`.csv` or `csv`); `None` accepts all files.
    #[serde(default)]
    pub file_extensions: Option<Vec<String>>,
    /// Provider options such as credentials, passed to the storage builder.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_environment() -> String {
    "prod".into()
}

fn default_env_type() -> String {
    "production".into()
}

fn default_data_source_type() -> String {
    "unknown".into()
}

impl DiscoveryConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw).context("parsing accounts TOML")?;
        for account in &cfg.accounts {
            Url::parse(&account.dsn)
                .with_context(|| format!("account `{}` has invalid dsn", account.name))?;
        }
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading accounts file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

impl AccountConfig {
    /// Folders to scan, with the container root standing in for none.
    pub fn folders(&self) -> Vec<String> {
        if self.folders.iter().all(|f| f.trim().is_empty()) {
            vec![String::new()]
        } else {
            self.folders.clone()
        }
    }

    pub fn storage_type(&self) -> String {
        if let Some(explicit) = &self.storage_type {
            return explicit.clone();
        }
        let scheme = Url::parse(&self.dsn)
            .map(|url| url.scheme().to_string())
            .unwrap_or_default();
        match scheme.as_str() {
            "az" | "azure" | "abfs" | "abfss" => "azure_blob".into(),
            "file" => "local_fs".into(),
            "memory" => "memory".into(),
            other => other.into(),
        }
    }
}
