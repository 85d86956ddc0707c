//! Application configuration management.
//!
//! Settings come from an optional JSON file at
//! `~/.config/paperlex/config.json`, overridden by environment variables
//! (a `.env` file is loaded into the environment by the binary first).
//! The variable names are listed in `apply_overrides`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credentials;
use crate::lexoffice::challenge::DEFAULT_CHALLENGE_TIMEOUT;
use crate::lexoffice::client::DEFAULT_BASE_URL;
use crate::lexoffice::session::{DEFAULT_SESSION_MAX_AGE_MINUTES, SESSION_FILE};
use crate::lexoffice::Credentials;
use crate::paperless::client::DEFAULT_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "paperlex";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Seconds between two sync cycles
const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paperless_url: Option<String>,
    pub paperless_token: Option<String>,
    /// Tag marking new documents; removed after a successful upload
    pub inbox_tag_id: Option<u64>,
    /// Tag marking documents destined for lexoffice
    pub lexoffice_tag_id: Option<u64>,
    pub lexoffice_username: Option<String>,
    /// Only read from the environment; otherwise the keychain is used
    #[serde(skip)]
    pub lexoffice_password: Option<String>,
    pub lexoffice_base_url: String,
    /// Custom field receiving the lexoffice voucher id
    pub voucher_field_id: Option<u64>,
    /// External browser challenge solver, e.g. `node solve.js`
    pub challenge_command: Option<String>,
    pub challenge_timeout_secs: u64,
    pub polling_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub upload_concurrency: usize,
    pub tmp_dir: PathBuf,
    pub lock_file: PathBuf,
    pub persist_session: bool,
    pub session_file: Option<PathBuf>,
    pub session_max_age_minutes: i64,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paperless_url: None,
            paperless_token: None,
            inbox_tag_id: None,
            lexoffice_tag_id: None,
            lexoffice_username: None,
            lexoffice_password: None,
            lexoffice_base_url: DEFAULT_BASE_URL.to_string(),
            voucher_field_id: None,
            challenge_command: None,
            challenge_timeout_secs: DEFAULT_CHALLENGE_TIMEOUT.as_secs(),
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            upload_concurrency: 1,
            tmp_dir: PathBuf::from("tmp"),
            lock_file: PathBuf::from("script.lock"),
            persist_session: true,
            session_file: None,
            session_max_age_minutes: DEFAULT_SESSION_MAX_AGE_MINUTES,
            log_dir: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value for {}: {:?} ({})", name, value, e))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("Invalid value for {}: {:?} (expected true/false)", name, value),
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from `lookup` (the process environment in production).
    /// Empty values are treated as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("PAPERLESS_URL") {
            self.paperless_url = Some(v);
        }
        if let Some(v) = var("PAPERLESS_TOKEN") {
            self.paperless_token = Some(v);
        }
        if let Some(v) = var("INBOX_TAG_ID") {
            self.inbox_tag_id = Some(parse_var("INBOX_TAG_ID", &v)?);
        }
        if let Some(v) = var("LEXOFFICE_TAG_ID") {
            self.lexoffice_tag_id = Some(parse_var("LEXOFFICE_TAG_ID", &v)?);
        }
        if let Some(v) = var("LEXOFFICE_USERNAME") {
            self.lexoffice_username = Some(v);
        }
        if let Some(v) = var("LEXOFFICE_PASSWORD") {
            self.lexoffice_password = Some(v);
        }
        if let Some(v) = var("LEXOFFICE_BASE_URL") {
            self.lexoffice_base_url = v;
        }
        if let Some(v) = var("LEXOFFICE_VOUCHER_FIELD_ID") {
            self.voucher_field_id = Some(parse_var("LEXOFFICE_VOUCHER_FIELD_ID", &v)?);
        }
        if let Some(v) = var("LEXOFFICE_CHALLENGE_COMMAND") {
            self.challenge_command = Some(v);
        }
        if let Some(v) = var("CHALLENGE_TIMEOUT") {
            self.challenge_timeout_secs = parse_var("CHALLENGE_TIMEOUT", &v)?;
        }
        if let Some(v) = var("POLLING_INTERVAL") {
            self.polling_interval_secs = parse_var("POLLING_INTERVAL", &v)?;
        }
        if let Some(v) = var("DEFAULT_TIMEOUT") {
            self.request_timeout_secs = parse_var("DEFAULT_TIMEOUT", &v)?;
        }
        if let Some(v) = var("UPLOAD_CONCURRENCY") {
            self.upload_concurrency = parse_var("UPLOAD_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("TMP_DIR") {
            self.tmp_dir = PathBuf::from(v);
        }
        if let Some(v) = var("LOCK_FILE") {
            self.lock_file = PathBuf::from(v);
        }
        if let Some(v) = var("PERSIST_SESSION") {
            self.persist_session = parse_bool("PERSIST_SESSION", &v)?;
        }
        if let Some(v) = var("SESSION_FILE") {
            self.session_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check that everything a sync cycle needs is present.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.paperless_url.is_none() {
            missing.push("PAPERLESS_URL");
        }
        if self.paperless_token.is_none() {
            missing.push("PAPERLESS_TOKEN");
        }
        if self.inbox_tag_id.is_none() {
            missing.push("INBOX_TAG_ID");
        }
        if self.lexoffice_tag_id.is_none() {
            missing.push("LEXOFFICE_TAG_ID");
        }
        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }
        if self.upload_concurrency == 0 {
            bail!("UPLOAD_CONCURRENCY must be at least 1");
        }
        if self.polling_interval_secs == 0 {
            bail!("POLLING_INTERVAL must be at least 1 second");
        }
        if self.challenge_timeout_secs == 0 {
            bail!("CHALLENGE_TIMEOUT must be at least 1 second");
        }
        if self.session_max_age_minutes <= 0 {
            bail!("session_max_age_minutes must be positive");
        }
        Ok(())
    }

    /// lexoffice credentials; the password falls back to the OS keychain.
    /// `None` means uploads can only use an existing session.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.lexoffice_username.as_deref()?;
        let password = match &self.lexoffice_password {
            Some(p) => p.clone(),
            None => match credentials::load_password(username) {
                Ok(Some(p)) => p,
                Ok(None) => {
                    debug!(username, "No lexoffice password in keychain");
                    return None;
                }
                Err(e) => {
                    warn!(username, "Keychain lookup failed: {:#}", e);
                    return None;
                }
            },
        };
        Some(Credentials::new(username, password))
    }

    /// Where the lexoffice session is persisted, if at all
    pub fn session_path(&self) -> Option<PathBuf> {
        if !self.persist_session {
            return None;
        }
        self.session_file
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join(APP_NAME).join(SESSION_FILE)))
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }

    pub fn session_max_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_max_age_minutes)
    }
}
