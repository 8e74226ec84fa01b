use std::path::Path;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use bus_nats::NatsConfig;
use pipeline::{BatchConfig, TableConfig};
use storage_clickhouse::ClickHouseConfig;

use crate::error::ServeError;

#[derive(Parser)]
#[command(name = "nats-clickhouse-relay", about = "NATS JetStream → ClickHouse batching relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить relay
    Serve(ServeArgs),
    /// Проверить конфиг и выйти
    Check(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к конфигу (.yml/.yaml или .toml)
    #[arg(long, default_value = "config.yml", env = "RELAY_CONFIG")]
    pub config: String,
}

// ═══════════════════════════════════════════════════════════════
//  Logging config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Color,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "color" => Ok(LogFormat::Color),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected text, color or json")),
        }
    }
}

fn default_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { format: LogFormat::default(), level: default_level() }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Result<LevelFilter, String> {
        self.level
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| format!("unknown log level '{}'", self.level))
    }
}

// ═══════════════════════════════════════════════════════════════
//  ServiceConfig
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &str) -> Result<Self, ServeError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yml") | Some("yaml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(ServeError::Config {
                context: "failed to read config file",
                detail: format!("'{path}': unsupported extension, expected .yml, .yaml or .toml"),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    /// Subjects to consume. Only the first one is subscribed.
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl ServiceConfig {
    /// Read, parse, apply environment overrides, validate.
    pub fn load(path: &str) -> Result<Self, ServeError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| ServeError::Config {
            context: "failed to read config file",
            detail: format!("'{path}': {e}"),
        })?;
        let mut config = Self::parse(&content, format).map_err(|detail| ServeError::Config {
            context: "failed to parse config",
            detail: format!("'{path}': {detail}"),
        })?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Override file values from the environment. `lookup` is
    /// `std::env::var` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ServeError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NATS_URL") {
            self.nats.url = v;
        }
        if let Some(v) = get("NATS_DURABLE") {
            self.nats.durable = v;
        }
        if let Some(v) = get("NATS_GROUP") {
            self.nats.group = v;
        }
        if let Some(v) = get("NATS_STREAM") {
            self.nats.stream = Some(v);
        }
        if let Some(v) = get("SUBJECTS") {
            self.subjects = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = get("CLICKHOUSE_URL") {
            self.clickhouse.url = Some(v);
        }
        if let Some(v) = get("CLICKHOUSE_HOSTNAME") {
            self.clickhouse.hostname = Some(v);
        }
        if let Some(v) = get("CLICKHOUSE_PORT") {
            self.clickhouse.port = parse_env("CLICKHOUSE_PORT", &v)?;
        }
        if let Some(v) = get("CLICKHOUSE_USERNAME") {
            self.clickhouse.username = Some(v);
        }
        if let Some(v) = lookup("CLICKHOUSE_PASSWORD") {
            self.clickhouse.password = Some(v);
        }
        if let Some(v) = get("CLICKHOUSE_DATABASE") {
            self.clickhouse.database = v;
        }

        if let Some(v) = get("BATCH_SIZE") {
            self.batch.size = parse_env("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("BATCH_TIMEOUT_MS") {
            self.batch.timeout_ms = parse_env("BATCH_TIMEOUT_MS", &v)?;
        }

        if let Some(v) = get("LOG_FORMAT") {
            self.log.format = v.parse().map_err(ServeError::invalid)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ServeError> {
        self.nats.validate().map_err(ServeError::invalid)?;
        if self.subjects.iter().all(|s| s.trim().is_empty()) {
            return Err(ServeError::invalid("at least one subject is required"));
        }
        self.clickhouse.validate().map_err(ServeError::invalid)?;
        self.table.validate().map_err(ServeError::invalid)?;
        self.batch.validate().map_err(ServeError::invalid)?;
        self.log.level_filter().map_err(ServeError::invalid)?;
        Ok(())
    }

    /// First configured subject.
    pub fn subject(&self) -> &str {
        self.subjects
            .iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }

    /// Effective settings with the password masked.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let password = match self.clickhouse.password.as_deref() {
            Some(p) if !p.is_empty() => "***",
            _ => "<empty>",
        };
        vec![
            ("nats.url", self.nats.url.clone()),
            ("nats.durable", self.nats.durable.clone()),
            ("nats.group", self.nats.group.clone()),
            ("nats.stream", self.nats.stream.clone().unwrap_or_else(|| "<by subject>".into())),
            ("subjects", self.subjects.join(",")),
            ("clickhouse.endpoint", self.clickhouse.display_host()),
            ("clickhouse.database", self.clickhouse.database.clone()),
            ("clickhouse.password", password.into()),
            ("clickhouse.compression", format!("{:?}", self.clickhouse.compression).to_lowercase()),
            ("table.name", self.table.name.clone()),
            ("table.partition_key_segment", self.table.partition_key_segment.to_string()),
            ("batch.size", self.batch.size.to_string()),
            ("batch.timeout_ms", self.batch.timeout_ms.to_string()),
            ("batch.channel_capacity", self.batch.channel_capacity().to_string()),
            ("log.format", format!("{:?}", self.log.format).to_lowercase()),
            ("log.level", self.log.level.clone()),
        ]
    }

    pub fn log_banner(&self, path: &str) {
        tracing::info!(config = %path, "nats-clickhouse-relay starting");
        for (key, value) in self.summary() {
            tracing::info!(%key, %value, "config");
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ServeError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ServeError::invalid(format!("{key}='{value}': {e}")))
}
