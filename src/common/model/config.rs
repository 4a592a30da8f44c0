use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::errors::{ConfigError, Result};

/// Redis Configuration
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct RedisConfig {
    /// Full connection URL; takes precedence over the discrete fields
    pub url: Option<String>,
    /// Redis server hostname
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    /// Redis server port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    /// Redis database index
    #[serde(default)]
    pub redis_db: u16,
    /// Optional Redis username
    pub redis_username: Option<String>,
    /// Optional Redis password
    pub redis_password: Option<String>,
    /// Connection pool size
    pub pool_size: Option<usize>,
    /// Enable TLS for connection
    pub tls: Option<bool>,
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl RedisConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url.as_ref().map(|_| "***REDACTED***"))
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_db", &self.redis_db)
            .field("redis_username", &self.redis_username)
            .field("redis_password", &self.redis_password.as_ref().map(|_| "***REDACTED***"))
            .field("pool_size", &self.pool_size)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Durable store configuration. No URL means the in-process store.
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: Option<String>,
    /// Database schema
    pub database_schema: Option<String>,
    /// Connection pool size
    pub pool_size: Option<u32>,
    /// Enable TLS (sslmode=require)
    pub tls: Option<bool>,
    /// Create tables and indexes at startup
    #[serde(default = "default_true")]
    pub bootstrap_schema: bool,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "***REDACTED***"))
            .field("database_schema", &self.database_schema)
            .field("pool_size", &self.pool_size)
            .field("tls", &self.tls)
            .field("bootstrap_schema", &self.bootstrap_schema)
            .finish()
    }
}

/// Hot cache configuration. No redis section means a process-local cache.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached results, in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl: u64,
    /// Key namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Redis configuration for cache storage
    pub redis: Option<RedisConfig>,
    /// Compression threshold in bytes (payloads larger than this will be compressed)
    pub compression_threshold: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            namespace: default_namespace(),
            redis: None,
            compression_threshold: None,
        }
    }
}

/// Channel (Queue) Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChannelConfig {
    /// Redis configuration for the queue; absent means in-process queue
    pub redis: Option<RedisConfig>,
    /// Topic jobs are published on
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Local channel capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Stream retention in hours, 0 disables trimming
    #[serde(default)]
    pub minid_time: u64,
    /// Redeliveries allowed for retryable failures before dead-lettering
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before a nacked job is republished, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Minimum idle time in milliseconds before a pending entry is reclaimed
    #[serde(default = "default_claim_min_idle")]
    pub claim_min_idle: u64,
    /// Interval in milliseconds between reclaim passes
    #[serde(default = "default_claim_interval")]
    pub claim_interval: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            redis: None,
            topic: default_topic(),
            capacity: default_capacity(),
            minid_time: 0,
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            claim_min_idle: default_claim_min_idle(),
            claim_interval: default_claim_interval(),
        }
    }
}

/// Worker, resolver and sync loop tuning
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout applied to every external call, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Extra time past the call timeout before the resolver gives up, in milliseconds
    #[serde(default = "default_deadline_grace")]
    pub deadline_grace_ms: u64,
    /// Delay before re-asking the cache or store after an empty answer, in milliseconds
    #[serde(default = "default_reissue_interval")]
    pub reissue_interval_ms: u64,
    /// Cache sync loop period, in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Number of popular topics kept warm
    #[serde(default = "default_popular_limit")]
    pub popular_limit: usize,
    /// MediaWiki API endpoint template, `{lang}` is substituted
    #[serde(default = "default_wikipedia_endpoint")]
    pub wikipedia_endpoint: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            deadline_grace_ms: default_deadline_grace(),
            reissue_interval_ms: default_reissue_interval(),
            sync_interval_secs: default_sync_interval(),
            popular_limit: default_popular_limit(),
            wikipedia_endpoint: default_wikipedia_endpoint(),
        }
    }
}

impl CrawlerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Topic extraction client configuration
#[derive(Serialize, Deserialize, Clone)]
pub struct ExtractionConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_extraction_model")]
    pub model: String,
    #[serde(default = "default_extraction_endpoint")]
    pub endpoint: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_extraction_model(),
            endpoint: default_extraction_endpoint(),
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***REDACTED***"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Logger section
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file_path: Option<String>,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: None,
            console: true,
            json: false,
        }
    }
}

/// Main Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Application instance name
    #[serde(default = "default_namespace")]
    pub name: String,
    /// Database configuration
    #[serde(default)]
    pub db: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Message channel configuration
    #[serde(default)]
    pub channel_config: ChannelConfig,
    /// Crawler behavior configuration
    #[serde(default)]
    pub crawler: CrawlerConfig,
    /// Topic extraction configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Logger configuration
    #[serde(default)]
    pub logger: LogSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_namespace(),
            db: DatabaseConfig {
                bootstrap_schema: true,
                ..Default::default()
            },
            cache: CacheConfig::default(),
            channel_config: ChannelConfig::default(),
            crawler: CrawlerConfig::default(),
            extraction: ExtractionConfig::default(),
            logger: LogSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config_str =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read(e.into()))?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).map_err(|e| ConfigError::Parse(e.into()))?;
        Ok(config)
    }

    /// Defaults overlaid with process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`; set values win over file values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = get("TOPICRAWL_NAME") {
            self.name = name;
        }
        if let Some(url) = get("DATABASE_URL") {
            self.db.url = Some(url);
        }
        if let Some(url) = get("REDIS_URL") {
            self.cache.redis = Some(RedisConfig::from_url(url));
        }
        if let Some(url) = get("QUEUE_REDIS_URL") {
            self.channel_config.redis = Some(RedisConfig::from_url(url));
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.extraction.api_key = Some(key);
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logger.level = level;
        }
        if let Some(v) = get("CACHE_TTL_SECS") {
            self.cache.ttl = parse_number("CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("SYNC_INTERVAL_SECS") {
            self.crawler.sync_interval_secs = parse_number("SYNC_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("CALL_TIMEOUT_SECS") {
            self.crawler.call_timeout_secs = parse_number("CALL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("POPULAR_TOPICS_LIMIT") {
            self.crawler.popular_limit = parse_number("POPULAR_TOPICS_LIMIT", &v)?;
        }
        if let Some(v) = get("QUEUE_MAX_RETRIES") {
            self.channel_config.max_retries = parse_number("QUEUE_MAX_RETRIES", &v)?;
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()).into())
}

fn default_true() -> bool {
    true
}
fn default_namespace() -> String {
    "topicrawl".to_string()
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_topic() -> String {
    "crawl_queue".to_string()
}
fn default_capacity() -> usize {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_claim_min_idle() -> u64 {
    600_000
}
fn default_claim_interval() -> u64 {
    60_000
}
fn default_call_timeout() -> u64 {
    10
}
fn default_deadline_grace() -> u64 {
    500
}
fn default_reissue_interval() -> u64 {
    200
}
fn default_sync_interval() -> u64 {
    1800
}
fn default_popular_limit() -> usize {
    5
}
fn default_wikipedia_endpoint() -> String {
    "https://{lang}.wikipedia.org/w/api.php".to_string()
}
fn default_extraction_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_extraction_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_log_level() -> String {
    "info,sqlx=warn,sea_orm=warn,hyper=warn".to_string()
}
