//! Configuration module for the subnet registrar
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation of the scheduling parameters, and conversion into the
//! settings structs consumed by the monitor, fee controller and executors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::block_monitor::reconcile::default_quorum;
use crate::block_monitor::window::WindowSchedule;
use crate::block_monitor::MonitorConfig;
use crate::errors::ConfigError;
use crate::executor::backoff::BackoffPolicy;
use crate::executor::ExecutorSettings;
use crate::fee_controller::FeeConfig;
use crate::wallet::WalletEntry;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network name passed to the chain client (e.g. "finney")
    #[serde(default = "default_network")]
    pub network: String,

    /// Target subnet
    #[serde(default = "default_subnet_id")]
    pub subnet_id: u16,

    /// Block height sources
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Explicit wallet list; when empty, wallets are discovered under `wallet_root`
    #[serde(default)]
    pub wallets: Vec<WalletEntry>,

    #[serde(default)]
    pub wallet_root: Option<String>,

    /// Number of concurrent attempt executors
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Lower bound of the retry delay
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_true")]
    pub enable_priority_fee: bool,

    #[serde(default)]
    pub window_sub_range: WindowRange,

    #[serde(default = "default_tempo_length")]
    pub tempo_length: u64,

    /// Maximum total submissions per wallet
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Default per-source timeout (sources may override)
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Minimum responding sources for high confidence (default: strict majority)
    #[serde(default)]
    pub quorum: Option<usize>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Re-check period while waiting for the window to open
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    /// Windows a wallet may try before it is abandoned
    #[serde(default = "default_max_windows")]
    pub max_windows: u32,

    #[serde(default = "default_confirmation_interval_ms")]
    pub confirmation_interval_ms: u64,

    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    #[serde(default = "default_status_notify_interval_secs")]
    pub status_notify_interval_secs: u64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub fee: FeeConfig,

    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Open block range within each tempo, `[start, end)`; wraps when `start > end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRange {
    pub start: u64,
    pub end: u64,
}

impl Default for WindowRange {
    fn default() -> Self {
        Self { start: 10, end: 60 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Substrate JSON-RPC node (`chain_getHeader`)
    SubstrateRpc,
    /// Explorer-style HTTP API with a JSON pointer to the height
    HttpJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub kind: SourceKind,

    /// JSON pointer to the height field (`http_json` only), e.g. `/data/blockNum`
    #[serde(default)]
    pub height_pointer: Option<String>,

    #[serde(default)]
    pub method: HttpMethod,

    /// Extra request headers (API keys)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// JSON body for POST requests
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// Overrides `source_timeout_ms`
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SourceConfig {
    pub fn timeout(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(default_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// In-process simulated market; no network submissions
    #[default]
    Simulation,
    /// Submissions go to the signing relay
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub mode: RunMode,

    /// Base URL of the signing relay (production mode)
    #[serde(default)]
    pub relay_url: Option<String>,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            relay_url: None,
            simulation: SimulationConfig::default(),
        }
    }
}

/// Parameters of the simulated registration market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_clearing_price")]
    pub clearing_price: u64,

    /// Relative clearing-price drift per submission
    #[serde(default = "default_price_drift")]
    pub price_drift: f64,

    #[serde(default = "default_open_slots")]
    pub open_slots: u32,

    #[serde(default = "default_error_rate")]
    pub error_rate: f64,

    #[serde(default = "default_sim_latency_ms")]
    pub latency_ms: u64,

    /// Registration cost the market reports; unset means it reports none
    #[serde(default)]
    pub burn_cost: Option<u64>,

    /// Balance every simulated wallet holds; unset means unknown
    #[serde(default)]
    pub wallet_balance: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            clearing_price: default_clearing_price(),
            price_drift: default_price_drift(),
            open_slots: default_open_slots(),
            error_rate: default_error_rate(),
            latency_ms: default_sim_latency_ms(),
            burn_cost: None,
            wallet_balance: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub telegram_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    /// Bot API base URL
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
}

impl NotificationConfig {
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_token.is_some() && self.telegram_chat_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// JSON-lines run report destination
    #[serde(default)]
    pub path: Option<String>,
}

// Default value functions
fn default_network() -> String { "finney".to_string() }
fn default_subnet_id() -> u16 { 1 }
fn default_thread_count() -> usize { 4 }
fn default_min_delay_ms() -> u64 { 10_000 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_tempo_length() -> u64 { 360 }
fn default_max_retries() -> u32 { 5 }
fn default_source_timeout_ms() -> u64 { 10_000 }
fn default_poll_interval_ms() -> u64 { 5_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_backoff_jitter() -> f64 { 0.2 }
fn default_wait_timeout_ms() -> u64 { 15_000 }
fn default_submit_timeout_ms() -> u64 { 30_000 }
fn default_max_windows() -> u32 { 1 }
fn default_confirmation_interval_ms() -> u64 { 30_000 }
fn default_status_interval_secs() -> u64 { 60 }
fn default_status_notify_interval_secs() -> u64 { 1_800 }
fn default_shutdown_grace_ms() -> u64 { 5_000 }
fn default_clearing_price() -> u64 { 1_200_000_000 }
fn default_price_drift() -> f64 { 0.05 }
fn default_open_slots() -> u32 { 8 }
fn default_error_rate() -> f64 { 0.05 }
fn default_sim_latency_ms() -> u64 { 250 }
fn default_telegram_api_base() -> String { "https://api.telegram.org".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load `.env`, the TOML file, then environment overrides.
    ///
    /// Not validated here; callers layer command line overrides first.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `REGISTRAR_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(network) = lookup("REGISTRAR_NETWORK") {
            self.network = network;
        }
        if let Some(v) = parse_override(&lookup, "REGISTRAR_SUBNET_ID")? {
            self.subnet_id = v;
        }
        if let Some(v) = parse_override(&lookup, "REGISTRAR_THREAD_COUNT")? {
            self.thread_count = v;
        }
        if let Some(v) = parse_override(&lookup, "REGISTRAR_MIN_DELAY_MS")? {
            self.min_delay_ms = v;
        }
        if let Some(v) = parse_override(&lookup, "REGISTRAR_MAX_DELAY_MS")? {
            self.max_delay_ms = v;
        }
        if let Some(v) = parse_override(&lookup, "REGISTRAR_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = parse_override(&lookup, "REGISTRAR_ENABLE_PRIORITY_FEE")? {
            self.enable_priority_fee = v;
        }
        if let Some(url) = lookup("REGISTRAR_RELAY_URL") {
            self.chain.relay_url = Some(url);
        }
        if let Some(token) = lookup("REGISTRAR_TELEGRAM_TOKEN") {
            self.notifications.telegram_token = Some(token);
        }
        if let Some(chat) = lookup("REGISTRAR_TELEGRAM_CHAT_ID") {
            self.notifications.telegram_chat_id = Some(chat);
        }
        if let Some(v) = parse_override(&lookup, "REGISTRAR_METRICS_PORT")? {
            self.monitoring.metrics_port = v;
        }
        Ok(())
    }

    /// Validate configuration. These are the only fatal startup errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::validation("at least one block source is required"));
        }
        if self.thread_count == 0 {
            return Err(ConfigError::validation("thread_count must be > 0"));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::validation(format!(
                "min_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::validation("max_retries must be > 0"));
        }
        if self.max_windows == 0 {
            return Err(ConfigError::validation("max_windows must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::validation("poll_interval_ms must be > 0"));
        }
        if self.confirmation_interval_ms == 0
            || self.status_interval_secs == 0
            || self.status_notify_interval_secs == 0
        {
            return Err(ConfigError::validation(
                "confirmation and status intervals must be > 0",
            ));
        }
        for (name, value) in [
            ("source_timeout_ms", self.source_timeout_ms),
            ("wait_timeout_ms", self.wait_timeout_ms),
            ("submit_timeout_ms", self.submit_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::validation(format!("{} must be > 0", name)));
            }
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::validation("backoff_multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::validation("backoff_jitter must be in range [0.0, 1.0]"));
        }

        self.window_schedule()?;

        if let Some(quorum) = self.quorum {
            if quorum == 0 || quorum > self.sources.len() {
                return Err(ConfigError::validation(format!(
                    "quorum must be in range [1, {}]",
                    self.sources.len()
                )));
            }
        }

        for source in &self.sources {
            if source.timeout_ms == Some(0) {
                return Err(ConfigError::validation(format!(
                    "source '{}' timeout_ms must be > 0",
                    source.name
                )));
            }
            if source.kind == SourceKind::HttpJson && source.height_pointer.is_none() {
                return Err(ConfigError::validation(format!(
                    "source '{}' requires height_pointer",
                    source.name
                )));
            }
        }

        self.fee.validate()?;

        if self.chain.mode == RunMode::Production && self.chain.relay_url.is_none() {
            return Err(ConfigError::validation(
                "chain.relay_url is required in production mode",
            ));
        }

        Ok(())
    }

    pub fn window_schedule(&self) -> Result<WindowSchedule, ConfigError> {
        WindowSchedule::new(
            self.tempo_length,
            self.window_sub_range.start,
            self.window_sub_range.end,
        )
    }

    pub fn effective_quorum(&self) -> usize {
        self.quorum.unwrap_or_else(|| default_quorum(self.sources.len()))
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        Ok(MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            quorum: self.effective_quorum(),
            schedule: self.window_schedule()?,
        })
    }

    pub fn fee_config(&self) -> FeeConfig {
        FeeConfig {
            enable_priority_fee: self.enable_priority_fee,
            ..self.fee.clone()
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
            jitter_factor: self.backoff_jitter,
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            max_retries: self.max_retries,
            max_windows: self.max_windows,
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            backoff: self.backoff_policy(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: default_network(),
            subnet_id: default_subnet_id(),
            sources: vec![SourceConfig {
                name: "finney-rpc".to_string(),
                url: "https://entrypoint-finney.opentensor.ai".to_string(),
                kind: SourceKind::SubstrateRpc,
                height_pointer: None,
                method: HttpMethod::Post,
                headers: BTreeMap::new(),
                body: None,
                timeout_ms: None,
            }],
            wallets: Vec::new(),
            wallet_root: None,
            thread_count: default_thread_count(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            enable_priority_fee: default_true(),
            window_sub_range: WindowRange::default(),
            tempo_length: default_tempo_length(),
            max_retries: default_max_retries(),
            source_timeout_ms: default_source_timeout_ms(),
            quorum: None,
            poll_interval_ms: default_poll_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter: default_backoff_jitter(),
            wait_timeout_ms: default_wait_timeout_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
            max_windows: default_max_windows(),
            confirmation_interval_ms: default_confirmation_interval_ms(),
            status_interval_secs: default_status_interval_secs(),
            status_notify_interval_secs: default_status_notify_interval_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            fee: FeeConfig::default(),
            chain: ChainConfig::default(),
            notifications: NotificationConfig::default(),
            monitoring: MonitoringConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

fn parse_override<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::Env {
            var: var.to_string(),
            message: e.to_string(),
        }),
    }
}
