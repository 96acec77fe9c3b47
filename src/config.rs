// src/config.rs

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{env, fmt, path::Path, time::Duration};

/// Direction of the trade flow a report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub enum TradeType {
    Export,
    Import,
}

impl TradeType {
    /// Value of the matching option in the trade type dropdown.
    pub fn form_value(&self) -> &'static str {
        match self {
            TradeType::Export => "E",
            TradeType::Import => "I",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Export => "Export",
            TradeType::Import => "Import",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    100
}

fn default_retry_delay_secs() -> u64 {
    5
}

/// The run configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub reporter_codes: Vec<String>,
    pub partner_codes: Vec<String>,
    #[serde(rename = "type")]
    pub trade_types: Vec<TradeType>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub export_to_sql: bool,
    #[serde(default)]
    pub insert_to_database: bool,
    /// Attempts per (reporter, partner, trade type) before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Abandon the remaining units once the run has been going this long.
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
}

impl Config {
    /// Read a JSON config, or YAML when the extension says so.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let config: Config = if is_yaml {
            serde_yaml::from_str(&text)
                .with_context(|| format!("parsing YAML config {}", path.display()))?
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("parsing JSON config {}", path.display()))?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

/// Connection parameters for the database sink, taken from the environment.
#[derive(Clone)]
pub struct DbSettings {
    pub host: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

impl fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSettings")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("table", &self.table)
            .finish()
    }
}

impl DbSettings {
    /// Load `env_file` if it exists, then read the `DB_*` variables.
    pub fn from_env(env_file: &Path) -> Result<Self> {
        if env_file.exists() {
            dotenvy::from_path(env_file)
                .with_context(|| format!("loading env file {}", env_file.display()))?;
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key).with_context(|| format!("environment variable {} is not set", key))
        };
        Ok(Self {
            host: get("DB_HOST")?,
            username: get("DB_USERNAME")?,
            password: get("DB_PASSWORD")?,
            database: get("DB_DATABASE")?,
            table: get("DB_TABLE")?,
        })
    }
}
