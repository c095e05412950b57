use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, str::FromStr};

pub const DEFAULT_LISTING_HARD_LIMIT: usize = 1000;
pub const DEFAULT_LOCATION: &str = "us-east-1";

/// Whether data may live on more than one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendMode {
    Single,
    Multiple,
}

impl FromStr for BackendMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multiple" => Ok(Self::Multiple),
            other => anyhow::bail!("unknown backend mode `{}`", other),
        }
    }
}

/// Data store backing a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// Payloads on the local disk under the storage directory.
    File,
    /// Payloads held in process memory.
    Mem,
}

/// One named location and its capability flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationConfig {
    #[serde(rename = "type")]
    pub kind: LocationKind,
    /// Parts of uploads controlled by this location are listed through the
    /// backend's own API instead of the metadata store.
    #[serde(default)]
    pub native_listing: bool,
}

impl LocationConfig {
    pub fn file() -> Self {
        Self {
            kind: LocationKind::File,
            native_listing: false,
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub backend_mode: BackendMode,
    pub listing_hard_limit: usize,
    pub default_location: String,
    pub locations: BTreeMap<String, LocationConfig>,
    pub replication_token: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-backend object gateway")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for file-backed locations (overrides OBJECT_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Backend mode (overrides OBJECT_GATEWAY_BACKENDS)
    #[arg(long, value_enum)]
    pub backends: Option<BackendMode>,

    /// Upper bound applied to max-parts (overrides OBJECT_GATEWAY_LISTING_HARD_LIMIT)
    #[arg(long)]
    pub listing_hard_limit: Option<usize>,

    /// JSON file describing locations (overrides OBJECT_GATEWAY_LOCATIONS_FILE)
    #[arg(long)]
    pub locations_file: Option<String>,

    /// Location used for buckets created without one (overrides OBJECT_GATEWAY_DEFAULT_LOCATION)
    #[arg(long)]
    pub default_location: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("OBJECT_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("OBJECT_GATEWAY_PORT", 8000u16)?;
        let env_storage =
            env::var("OBJECT_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("OBJECT_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/gateway.db".into());
        let env_mode = parse_env("OBJECT_GATEWAY_BACKENDS", BackendMode::Single)?;
        let env_limit = parse_env(
            "OBJECT_GATEWAY_LISTING_HARD_LIMIT",
            DEFAULT_LISTING_HARD_LIMIT,
        )?;
        let env_default_location = env::var("OBJECT_GATEWAY_DEFAULT_LOCATION")
            .unwrap_or_else(|_| DEFAULT_LOCATION.into());

        let locations_file = args
            .locations_file
            .or_else(|| env::var("OBJECT_GATEWAY_LOCATIONS_FILE").ok());
        let locations = match locations_file {
            Some(path) => load_locations(&path)?,
            None => default_locations(),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            backend_mode: args.backends.unwrap_or(env_mode),
            listing_hard_limit: args.listing_hard_limit.unwrap_or(env_limit),
            default_location: args.default_location.unwrap_or(env_default_location),
            locations,
            replication_token: env::var("OBJECT_GATEWAY_REPLICATION_TOKEN").ok(),
        };

        if !cfg.locations.contains_key(&cfg.default_location) {
            anyhow::bail!(
                "default location `{}` is not among the configured locations",
                cfg.default_location
            );
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Read a `{ "<name>": { "type": "file" | "mem", "nativeListing": bool } }` document.
pub fn load_locations(path: &str) -> Result<BTreeMap<String, LocationConfig>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading locations {}", path))?;
    parse_locations(&raw).with_context(|| format!("parsing locations {}", path))
}

pub fn parse_locations(raw: &str) -> Result<BTreeMap<String, LocationConfig>> {
    let locations: BTreeMap<String, LocationConfig> = serde_json::from_str(raw)?;
    if locations.is_empty() {
        anyhow::bail!("at least one location must be configured");
    }
    Ok(locations)
}

pub fn default_locations() -> BTreeMap<String, LocationConfig> {
    BTreeMap::from([(DEFAULT_LOCATION.to_string(), LocationConfig::file())])
}
