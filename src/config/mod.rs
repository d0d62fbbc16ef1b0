//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::net::SocketAddr;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "piazza";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_SHOP_TTL_SECS: u64 = 30 * 60;
const DEFAULT_VOUCHER_LOGICAL_TTL_SECS: u64 = 20;
const DEFAULT_NULL_TTL_SECS: u64 = 2 * 60;
const DEFAULT_REBUILD_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_REBUILD_CONCURRENCY: usize = 10;
const DEFAULT_WORKER_STREAM: &str = "stream:orders";
const DEFAULT_WORKER_GROUP: &str = "g1";
const DEFAULT_WORKER_CONSUMER: &str = "c1";
const DEFAULT_WORKER_BLOCK_SECS: u64 = 2;
const DEFAULT_WORKER_LOCK_TTL_SECS: u64 = 1200;

/// Command-line arguments for the Piazza binary.
#[derive(Debug, Parser)]
#[command(name = "piazza", version, about = "Piazza marketplace server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PIAZZA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Piazza HTTP service and order worker.
    Serve(ServeArgs),
    /// Apply database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the in-process order worker.
    #[arg(
        long = "worker-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub worker_enabled: Option<bool>,

    /// Override the order worker's consumer name.
    #[arg(long = "worker-consumer", value_name = "NAME")]
    pub worker_consumer: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub shop_ttl_secs: u64,
    pub voucher_logical_ttl_secs: u64,
    pub null_ttl_secs: u64,
    pub rebuild_lock_ttl_secs: u64,
    pub rebuild_concurrency: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub enabled: bool,
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub block: Duration,
    pub lock_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Parse the command line and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PIAZZA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    worker: RawWorkerSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    shop_ttl_secs: Option<u64>,
    voucher_logical_ttl_secs: Option<u64>,
    null_ttl_secs: Option<u64>,
    rebuild_lock_ttl_secs: Option<u64>,
    rebuild_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    enabled: Option<bool>,
    stream: Option<String>,
    group: Option<String>,
    consumer: Option<String>,
    block_secs: Option<u64>,
    lock_ttl_secs: Option<u64>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_database_override(&overrides.database);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.worker_enabled {
            self.worker.enabled = Some(enabled);
        }
        if let Some(consumer) = overrides.worker_consumer.as_ref() {
            self.worker.consumer = Some(consumer.clone());
        }
    }

    fn apply_database_override(&mut self, database: &DatabaseOverride) {
        if let Some(url) = database.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let host = raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = raw.server.port.unwrap_or(DEFAULT_PORT);
        let addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|err| LoadError::invalid("server.host", err.to_string()))?;

        let level = match raw.logging.level {
            Some(level) => LevelFilter::from_str(&level)
                .map_err(|err| LoadError::invalid("logging.level", err.to_string()))?,
            None => LevelFilter::INFO,
        };
        let format = if raw.logging.json.unwrap_or(false) {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };

        let max_connections = raw
            .database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
        let max_connections = NonZeroU32::new(max_connections)
            .ok_or_else(|| LoadError::invalid("database.max_connections", "must be non-zero"))?;

        let rebuild_concurrency = raw
            .cache
            .rebuild_concurrency
            .unwrap_or(DEFAULT_REBUILD_CONCURRENCY);
        let rebuild_concurrency = NonZeroUsize::new(rebuild_concurrency)
            .ok_or_else(|| LoadError::invalid("cache.rebuild_concurrency", "must be non-zero"))?;

        Ok(Self {
            server: ServerSettings { addr },
            logging: LoggingSettings { level, format },
            database: DatabaseSettings {
                url: raw.database.url,
                max_connections,
            },
            cache: CacheSettings {
                shop_ttl_secs: raw.cache.shop_ttl_secs.unwrap_or(DEFAULT_SHOP_TTL_SECS),
                voucher_logical_ttl_secs: raw
                    .cache
                    .voucher_logical_ttl_secs
                    .unwrap_or(DEFAULT_VOUCHER_LOGICAL_TTL_SECS),
                null_ttl_secs: raw.cache.null_ttl_secs.unwrap_or(DEFAULT_NULL_TTL_SECS),
                rebuild_lock_ttl_secs: raw
                    .cache
                    .rebuild_lock_ttl_secs
                    .unwrap_or(DEFAULT_REBUILD_LOCK_TTL_SECS),
                rebuild_concurrency,
            },
            worker: WorkerSettings {
                enabled: raw.worker.enabled.unwrap_or(true),
                stream: raw
                    .worker
                    .stream
                    .unwrap_or_else(|| DEFAULT_WORKER_STREAM.to_string()),
                group: raw
                    .worker
                    .group
                    .unwrap_or_else(|| DEFAULT_WORKER_GROUP.to_string()),
                consumer: raw
                    .worker
                    .consumer
                    .unwrap_or_else(|| DEFAULT_WORKER_CONSUMER.to_string()),
                block: Duration::from_secs(
                    raw.worker.block_secs.unwrap_or(DEFAULT_WORKER_BLOCK_SECS),
                ),
                lock_ttl: Duration::from_secs(
                    raw.worker
                        .lock_ttl_secs
                        .unwrap_or(DEFAULT_WORKER_LOCK_TTL_SECS),
                ),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_any_sources() {
        let settings = Settings::from_raw(RawSettings::default()).unwrap();

        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert!(settings.database.url.is_none());
        assert_eq!(settings.cache.shop_ttl_secs, 1800);
        assert_eq!(settings.worker.group, "g1");
        assert_eq!(settings.worker.block, Duration::from_secs(2));
        assert!(settings.worker.enabled);
    }

    #[test]
    fn serve_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(3000);
        raw.worker.consumer = Some("file-consumer".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4100),
            worker_consumer: Some("cli-consumer".to_string()),
            log_json: Some(true),
            ..Default::default()
        };
        raw.apply_serve_overrides(&overrides);

        let settings = Settings::from_raw(raw).unwrap();
        assert_eq!(settings.server.addr.port(), 4100);
        assert_eq!(settings.worker.consumer, "cli-consumer");
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn zero_rebuild_concurrency_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.rebuild_concurrency = Some(0);

        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key, .. }) if key == "cache.rebuild_concurrency"
        ));
    }

    #[test]
    fn garbled_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("chatty".to_string());

        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key, .. }) if key == "logging.level"
        ));
    }

    #[test]
    fn parse_serve_overrides() {
        let cli = CliArgs::parse_from([
            "piazza",
            "serve",
            "--server-port",
            "8080",
            "--log-level",
            "debug",
            "--worker-enabled",
            "false",
        ]);

        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.overrides.server_port, Some(8080));
        assert_eq!(args.overrides.log_level.as_deref(), Some("debug"));
        assert_eq!(args.overrides.worker_enabled, Some(false));
    }

    #[test]
    fn parse_migrate_arguments() {
        let cli = CliArgs::parse_from([
            "piazza",
            "migrate",
            "--database-url",
            "postgres://localhost/piazza",
        ]);

        let Some(Command::Migrate(args)) = cli.command else {
            panic!("expected migrate command");
        };
        assert_eq!(
            args.database.database_url.as_deref(),
            Some("postgres://localhost/piazza")
        );
    }
}
