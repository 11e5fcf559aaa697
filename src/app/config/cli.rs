use super::groups::{MetricsConfig, SchedulerConfig};
use super::serde_helpers::{
    fill_unset, load_env_path, load_env_path_opt, load_env_string_opt, load_env_var,
};
use super::{ConfigError, LogLevel};
use crate::sender::{ClientConfig, DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT_SECS, LrsSettings};
use crate::store::StoreConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const INLINE_CONFIG_ENV: &str = "LRS_FORWARDER_CONFIG";

#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(author, version)]
#[serde(default)]
pub struct Config {
    /// Base URL of the LRS xAPI endpoint (statements are POSTed to `<url>/statements`)
    #[arg(long, env = "LRS_XAPI_ENDPOINT")]
    pub xapi_endpoint: Option<String>,

    /// LRS basic-auth key
    #[arg(long, env = "LRS_KEY")]
    pub key: Option<String>,

    /// LRS basic-auth secret
    #[arg(long, env = "LRS_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Authorization header sent instead of basic auth
    #[arg(long, env = "LRS_AUTHORIZATION_HEADER", hide_env_values = true)]
    pub authorization_header: Option<String>,

    /// Statements per batch (values below 1 fall back to 100)
    #[arg(long, env = "LRS_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE as i64, allow_negative_numbers = true)]
    pub batch_size: i64,

    /// Request timeout in seconds (values of 0 or less fall back to 45)
    #[arg(long, env = "LRS_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS, allow_negative_numbers = true)]
    pub timeout: f64,

    /// Directory holding the queues and the outcome log
    #[arg(long, env = "LRS_DATA_DIR", default_value = "/var/lib/lrs-forwarder")]
    pub data_dir: PathBuf,

    /// Seconds a claimed item stays invisible to other workers
    #[arg(long, env = "CLAIM_LEASE_SECS", default_value = "1200")]
    pub claim_lease_secs: u64,

    #[arg(long, env = "GROUPING_INTERVAL_SECS", default_value = "60")]
    pub grouping_interval_secs: u64,

    #[arg(long, env = "DELIVERY_INTERVAL_SECS", default_value = "60")]
    pub delivery_interval_secs: u64,

    /// Batches delivered per tick, 0 for all
    #[arg(long, env = "MAX_BATCHES_PER_RUN", default_value = "0")]
    pub max_batches_per_run: usize,

    /// Seconds to pause delivery after a suspend signal
    #[arg(long, env = "SUSPEND_COOLDOWN_SECS", default_value = "3600")]
    pub suspend_cooldown_secs: u64,

    /// Days of outcome rows to keep, 0 to keep everything
    #[arg(long, env = "RETENTION_DAYS", default_value = "0")]
    pub retention_days: u32,

    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value = "10")]
    pub connect_timeout_secs: u64,

    #[arg(long, env = "MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: usize,

    #[arg(long, env = "LOG_LEVEL", default_value = "info", ignore_case = true)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    #[arg(long, env = "ENABLE_METRICS")]
    pub enable_metrics: bool,

    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub claim_lease: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub connect_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub scheduler: SchedulerConfig,

    #[serde(skip)]
    #[arg(skip)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            xapi_endpoint: None,
            key: None,
            secret: None,
            authorization_header: None,
            batch_size: DEFAULT_BATCH_SIZE as i64,
            timeout: DEFAULT_TIMEOUT_SECS,
            data_dir: PathBuf::from("/var/lib/lrs-forwarder"),
            claim_lease_secs: 1200,
            grouping_interval_secs: 60,
            delivery_interval_secs: 60,
            max_batches_per_run: 0,
            suspend_cooldown_secs: 3600,
            retention_days: 0,
            connect_timeout_secs: 10,
            max_connections: 10,
            log_level: LogLevel::Info,
            log_json: false,
            enable_metrics: false,
            metrics_port: 9090,
            config_file: None,
            claim_lease: Duration::from_secs(1200),
            connect_timeout: Duration::from_secs(10),
            scheduler: SchedulerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(inline) = std::env::var(INLINE_CONFIG_ENV) {
            return Self::from_toml(&inline);
        }

        let mut config = Config::default();

        load_env_string_opt("LRS_XAPI_ENDPOINT", &mut config.xapi_endpoint);
        load_env_string_opt("LRS_KEY", &mut config.key);
        load_env_string_opt("LRS_SECRET", &mut config.secret);
        load_env_string_opt("LRS_AUTHORIZATION_HEADER", &mut config.authorization_header);
        load_env_var("LRS_BATCH_SIZE", &mut config.batch_size)?;
        load_env_var("LRS_TIMEOUT", &mut config.timeout)?;
        load_env_path("LRS_DATA_DIR", &mut config.data_dir);
        load_env_var("CLAIM_LEASE_SECS", &mut config.claim_lease_secs)?;
        load_env_var("GROUPING_INTERVAL_SECS", &mut config.grouping_interval_secs)?;
        load_env_var("DELIVERY_INTERVAL_SECS", &mut config.delivery_interval_secs)?;
        load_env_var("MAX_BATCHES_PER_RUN", &mut config.max_batches_per_run)?;
        load_env_var("SUSPEND_COOLDOWN_SECS", &mut config.suspend_cooldown_secs)?;
        load_env_var("RETENTION_DAYS", &mut config.retention_days)?;
        load_env_var("CONNECT_TIMEOUT_SECS", &mut config.connect_timeout_secs)?;
        load_env_var("MAX_CONNECTIONS", &mut config.max_connections)?;

        // LogLevel requires special handling for case-insensitive parsing
        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.log_level = log_level
                .parse()
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {log_level}")))?;
        }

        load_env_var("LOG_JSON", &mut config.log_json)?;
        load_env_var("ENABLE_METRICS", &mut config.enable_metrics)?;
        load_env_var("METRICS_PORT", &mut config.metrics_port)?;
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Finishes a configuration parsed from the command line.
    ///
    /// A config file replaces the parsed values entirely. Otherwise values
    /// from the inline TOML in `LRS_FORWARDER_CONFIG` fill in whatever was
    /// left at its default.
    pub fn resolve(mut self) -> Result<Self, ConfigError> {
        if let Some(path) = self.config_file.clone() {
            return Self::from_file(path);
        }

        if let Ok(inline) = std::env::var(INLINE_CONFIG_ENV) {
            let base: Config = toml::from_str(&inline)?;
            self.merge_unset(&base);
        }

        self.post_process()?;
        self.validate()?;
        Ok(self)
    }

    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Config::parse_from(args).resolve()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn merge_unset(&mut self, base: &Config) {
        let defaults = Config::default();

        if self.xapi_endpoint.is_none() {
            self.xapi_endpoint.clone_from(&base.xapi_endpoint);
        }
        if self.key.is_none() {
            self.key.clone_from(&base.key);
        }
        if self.secret.is_none() {
            self.secret.clone_from(&base.secret);
        }
        if self.authorization_header.is_none() {
            self.authorization_header
                .clone_from(&base.authorization_header);
        }
        fill_unset(&mut self.batch_size, &defaults.batch_size, &base.batch_size);
        fill_unset(&mut self.timeout, &defaults.timeout, &base.timeout);
        fill_unset(&mut self.data_dir, &defaults.data_dir, &base.data_dir);
        fill_unset(
            &mut self.claim_lease_secs,
            &defaults.claim_lease_secs,
            &base.claim_lease_secs,
        );
        fill_unset(
            &mut self.grouping_interval_secs,
            &defaults.grouping_interval_secs,
            &base.grouping_interval_secs,
        );
        fill_unset(
            &mut self.delivery_interval_secs,
            &defaults.delivery_interval_secs,
            &base.delivery_interval_secs,
        );
        fill_unset(
            &mut self.max_batches_per_run,
            &defaults.max_batches_per_run,
            &base.max_batches_per_run,
        );
        fill_unset(
            &mut self.suspend_cooldown_secs,
            &defaults.suspend_cooldown_secs,
            &base.suspend_cooldown_secs,
        );
        fill_unset(
            &mut self.retention_days,
            &defaults.retention_days,
            &base.retention_days,
        );
        fill_unset(
            &mut self.connect_timeout_secs,
            &defaults.connect_timeout_secs,
            &base.connect_timeout_secs,
        );
        fill_unset(
            &mut self.max_connections,
            &defaults.max_connections,
            &base.max_connections,
        );
        fill_unset(&mut self.log_level, &defaults.log_level, &base.log_level);
        fill_unset(&mut self.log_json, &defaults.log_json, &base.log_json);
        fill_unset(
            &mut self.enable_metrics,
            &defaults.enable_metrics,
            &base.enable_metrics,
        );
        fill_unset(&mut self.metrics_port, &defaults.metrics_port, &base.metrics_port);
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.claim_lease = Duration::from_secs(self.claim_lease_secs);
        self.connect_timeout = Duration::from_secs(self.connect_timeout_secs);

        self.scheduler.grouping_interval = Duration::from_secs(self.grouping_interval_secs);
        self.scheduler.delivery_interval = Duration::from_secs(self.delivery_interval_secs);
        self.scheduler.suspend_cooldown = Duration::from_secs(self.suspend_cooldown_secs);
        self.scheduler.max_batches_per_run = self.max_batches_per_run;
        self.scheduler.retention_days = self.retention_days;

        self.metrics.enabled = self.enable_metrics;
        self.metrics.port = self.metrics_port;

        Ok(())
    }

    pub fn to_lrs_settings(&self) -> LrsSettings {
        LrsSettings {
            xapi_endpoint: self.xapi_endpoint.clone(),
            key: self.key.clone(),
            secret: self.secret.clone(),
            authorization_header: self.authorization_header.clone(),
            batch_size: self.batch_size,
            timeout: self.timeout,
        }
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: self.connect_timeout,
            max_connections: self.max_connections,
            ..ClientConfig::default()
        }
    }

    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.data_dir.clone(),
            ..StoreConfig::default()
        }
    }
}
