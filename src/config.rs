use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn config_path(cli_override: Option<&Path>, env: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }
    env("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Scalars in the YAML file may be written quoted or bare (`port: 8080`,
/// `port: "8080"`, `flush_timeout: 5`, `flush_timeout: "5s"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FileScalar {
    Int(u64),
    Str(String),
}

impl FileScalar {
    fn to_text(&self) -> String {
        match self {
            FileScalar::Int(value) => value.to_string(),
            FileScalar::Str(value) => value.trim().to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    app: AppSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    #[serde(default)]
    port: Option<FileScalar>,
    #[serde(default)]
    request_timeout: Option<FileScalar>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<FileScalar>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    max_open_conns: Option<u32>,
    #[serde(default)]
    max_idle_conns: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSection {
    #[serde(default, alias = "write_timeout")]
    request_timeout: Option<FileScalar>,
    #[serde(default)]
    batch_size: Option<usize>,
    #[serde(default, alias = "flush_interval")]
    flush_timeout: Option<FileScalar>,
    #[serde(default, alias = "queue_capacity")]
    channel_buffer: Option<usize>,
    #[serde(default)]
    shutdown_deadline: Option<FileScalar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "plain" | "pretty" => Ok(LogFormat::Text),
            other => bail!("unknown log format {other:?} (expected json or text)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Full connection URL; wins over the individual parts when present.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            name: "bench_server".to_string(),
            max_open_conns: 25,
            max_idle_conns: 5,
        }
    }
}

/// The knobs the ingest pipeline itself consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub shutdown_deadline: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            shutdown_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub request_timeout: Duration,
    pub database: DatabaseConfig,
    pub log_level: String,
    pub log_format: LogFormat,
    pub pipeline: PipelineSettings,
    pub otlp_endpoint: Option<String>,
    /// The file the settings were read from, if one existed.
    pub loaded_from: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            request_timeout: Duration::from_secs(15),
            database: DatabaseConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            pipeline: PipelineSettings::default(),
            otlp_endpoint: None,
            loaded_from: None,
        }
    }
}

impl Config {
    /// Defaults, then the YAML file, then environment variables.
    ///
    /// A missing file is not an error; a file that exists but cannot be read
    /// or parsed is.
    pub fn load(cli_override: Option<&Path>) -> Result<Self> {
        dotenv().ok();
        Self::load_with(cli_override, &env_optional)
    }

    fn load_with(
        cli_override: Option<&Path>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        let path = config_path(cli_override, env);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            config
                .apply_yaml(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            config.loaded_from = Some(path);
        } else if cli_override.is_some() {
            bail!("config file {} not found", path.display());
        }

        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let file: ConfigFile = serde_yaml::from_str(contents)?;

        if let Some(port) = file.server.port {
            self.port = parse_value("server.port", &port.to_text())?;
        }
        if let Some(timeout) = file.server.request_timeout {
            self.request_timeout = parse_duration(&timeout.to_text())
                .context("invalid server.request_timeout")?;
        }

        let db = file.database;
        if let Some(url) = db.url.filter(|v| !v.trim().is_empty()) {
            self.database.url = Some(url.trim().to_string());
        }
        if let Some(host) = db.host.filter(|v| !v.trim().is_empty()) {
            self.database.host = host.trim().to_string();
        }
        if let Some(port) = db.port {
            self.database.port = parse_value("database.port", &port.to_text())?;
        }
        if let Some(user) = db.user.filter(|v| !v.trim().is_empty()) {
            self.database.user = user.trim().to_string();
        }
        if let Some(password) = db.password {
            self.database.password = password;
        }
        if let Some(name) = db.name.filter(|v| !v.trim().is_empty()) {
            self.database.name = name.trim().to_string();
        }
        if let Some(value) = db.max_open_conns.filter(|v| *v != 0) {
            self.database.max_open_conns = value;
        }
        if let Some(value) = db.max_idle_conns {
            self.database.max_idle_conns = value;
        }

        if let Some(level) = file.logging.level.filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
        if let Some(format) = file.logging.format.filter(|v| !v.trim().is_empty()) {
            self.log_format = format.parse()?;
        }

        let app = file.app;
        if let Some(timeout) = app.request_timeout {
            self.request_timeout =
                parse_duration(&timeout.to_text()).context("invalid app.write_timeout")?;
        }
        if let Some(value) = app.batch_size {
            self.pipeline.batch_size = value;
        }
        if let Some(value) = app.flush_timeout {
            self.pipeline.flush_interval =
                parse_duration(&value.to_text()).context("invalid app.flush_timeout")?;
        }
        if let Some(value) = app.channel_buffer {
            self.pipeline.queue_capacity = value;
        }
        if let Some(value) = app.shutdown_deadline {
            self.pipeline.shutdown_deadline =
                parse_duration(&value.to_text()).context("invalid app.shutdown_deadline")?;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = env_parse(env, "PORT")? {
            self.port = port;
        }
        if let Some(url) = env("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = env("DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = env_parse(env, "DB_PORT")? {
            self.database.port = port;
        }
        if let Some(user) = env("DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = env("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(name) = env("DB_NAME") {
            self.database.name = name;
        }
        if let Some(value) = env_parse(env, "DB_MAX_OPEN_CONNS")? {
            self.database.max_open_conns = value;
        }
        if let Some(value) = env_parse(env, "DB_MAX_IDLE_CONNS")? {
            self.database.max_idle_conns = value;
        }
        if let Some(level) = env("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = env("LOG_FORMAT") {
            self.log_format = format.parse().context("invalid LOG_FORMAT")?;
        }
        if let Some(value) = env_parse(env, "INGEST_BATCH_SIZE")? {
            self.pipeline.batch_size = value;
        }
        if let Some(value) = env_duration(env, "INGEST_FLUSH_INTERVAL")? {
            self.pipeline.flush_interval = value;
        }
        if let Some(value) = env_parse(env, "INGEST_QUEUE_CAPACITY")? {
            self.pipeline.queue_capacity = value;
        }
        if let Some(value) = env_duration(env, "INGEST_SHUTDOWN_DEADLINE")? {
            self.pipeline.shutdown_deadline = value;
        }
        self.otlp_endpoint = env("OTEL_EXPORTER_OTLP_ENDPOINT");
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.pipeline.queue_capacity == 0 {
            bail!("queue capacity (channel_buffer) must be greater than zero");
        }
        if self.pipeline.flush_interval.is_zero() {
            bail!("flush interval must be greater than zero");
        }
        if self.database.max_open_conns == 0 {
            bail!("max_open_conns must be greater than zero");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Parses Go-style durations as used in the YAML files: `750ms`, `5s`,
/// `1m30s`, `2h`. A bare integer is taken as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration");
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| anyhow!("missing unit in duration {raw:?}"))?;
        if number_end == 0 {
            bail!("invalid duration {raw:?}");
        }
        let number = &rest[..number_end];
        let unit_end = rest[number_end..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .map(|idx| number_end + idx)
            .unwrap_or(rest.len());
        let unit_nanos: u64 = match &rest[number_end..unit_end] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            unit => bail!("unknown unit {unit:?} in duration {raw:?}"),
        };
        let nanos = if number.contains('.') {
            let value: f64 = number
                .parse()
                .with_context(|| format!("invalid number in duration {raw:?}"))?;
            let nanos = (value * unit_nanos as f64).round();
            if !nanos.is_finite() || nanos > u64::MAX as f64 {
                bail!("duration {raw:?} out of range");
            }
            nanos as u64
        } else {
            number
                .parse::<u64>()
                .ok()
                .and_then(|value| value.checked_mul(unit_nanos))
                .ok_or_else(|| anyhow!("duration {raw:?} out of range"))?
        };
        total = total
            .checked_add(Duration::from_nanos(nanos))
            .ok_or_else(|| anyhow!("duration {raw:?} out of range"))?;
        rest = &rest[unit_end..];
    }
    Ok(total)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("invalid {key}: {raw:?}"))
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key).map(|raw| parse_value(key, &raw)).transpose()
}

fn env_duration(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    env(key)
        .map(|raw| parse_duration(&raw).with_context(|| format!("invalid {key}")))
        .transpose()
}
