use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding trial counts, triggers, snapshots and deltas.
    pub database_path: String,
    /// Apps processed by `run --all`.
    pub apps: Vec<String>,
    pub analyzer: AnalyzerConfig,
    pub refresh: RefreshConfig,
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "~/.trialwatch/trialwatch.db".into(),
            apps: Vec::new(),
            analyzer: AnalyzerConfig::default(),
            refresh: RefreshConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

/// How today's count is compared against the baseline median.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Anomalous when `today > baseline + additive_threshold`.
    Additive,
    /// Anomalous when `today > baseline * (1 + relative_threshold)`.
    Relative,
}

impl ThresholdMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Additive => "additive",
            Self::Relative => "relative",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Trailing days (today excluded) the baseline median is computed over.
    pub history_days: u32,
    /// Fewer stored days than this and the day is not evaluable.
    pub min_history_days: u32,
    pub mode: ThresholdMode,
    pub additive_threshold: f64,
    pub relative_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            history_days: 30,
            min_history_days: 7,
            mode: ThresholdMode::Relative,
            additive_threshold: 5.0,
            relative_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Videos observed within this many days (ending on the trigger date) are refreshed.
    pub candidate_window_days: u32,
    /// Maximum provider requests in flight.
    pub concurrency: usize,
    /// Fraction of candidates allowed to fail before the batch is aborted.
    pub max_failure_rate: f64,
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            candidate_window_days: 10,
            concurrency: 4,
            max_failure_rate: 0.5,
            request_timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per video, including the first. 1 disables retries.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_token: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.apify.com".into(),
            api_token: None,
        }
    }
}

impl Config {
    /// Default config file location: `<config dir>/trialwatch/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "trialwatch")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location), apply env overrides, validate.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(ref p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config: {}", p.display()))?;
                Self::from_toml(&raw).with_context(|| format!("parsing config: {}", p.display()))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("APIFY_API_KEY") {
            if !token.trim().is_empty() {
                self.provider.api_token = Some(token);
            }
        }
        if let Ok(db) = std::env::var("TRIALWATCH_DB") {
            if !db.trim().is_empty() {
                self.database_path = db;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.analyzer;
        if a.history_days == 0 {
            bail!("analyzer.history_days must be at least 1");
        }
        if a.min_history_days > a.history_days {
            bail!(
                "analyzer.min_history_days ({}) exceeds analyzer.history_days ({})",
                a.min_history_days,
                a.history_days
            );
        }
        if !(a.additive_threshold >= 0.0 && a.relative_threshold >= 0.0) {
            bail!("analyzer thresholds must be non-negative");
        }
        let r = &self.refresh;
        if r.concurrency == 0 {
            bail!("refresh.concurrency must be at least 1");
        }
        if r.candidate_window_days == 0 {
            bail!("refresh.candidate_window_days must be at least 1");
        }
        if !(0.0..=1.0).contains(&r.max_failure_rate) {
            bail!("refresh.max_failure_rate must be within [0, 1]");
        }
        if r.retry.max_attempts == 0 {
            bail!("refresh.retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Database path with `~` and env vars expanded.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.database_path)
            .with_context(|| format!("expanding database_path: {}", self.database_path))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}
