//! Nudge configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NudgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NudgeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub reminder: ReminderConfig,
}

impl NudgeConfig {
    /// Load config from `NUDGE_CONFIG` or the default path (~/.nudge/config.toml).
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var("NUDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NudgeError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| NudgeError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        tracing::info!("📄 Config loaded from {}", path.display());
        Ok(config)
    }

    /// Reject values that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.queue_capacity == 0 {
            return Err(NudgeError::config("dispatch.queue_capacity must be > 0"));
        }
        if self.dispatch.country_code.is_empty()
            || !self.dispatch.country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(NudgeError::config(format!(
                "dispatch.country_code must be digits, got {:?}",
                self.dispatch.country_code
            )));
        }
        if self.reminder.hour > 23 || self.reminder.minute > 59 {
            return Err(NudgeError::config(format!(
                "reminder time {:02}:{:02} is not a valid wall-clock time",
                self.reminder.hour, self.reminder.minute
            )));
        }
        if let Some(day) = self.reminder.days_of_month.iter().find(|d| !(1..=31).contains(*d)) {
            return Err(NudgeError::config(format!(
                "reminder.days_of_month contains invalid day {day}"
            )));
        }
        self.reminder.tz()?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Nudge home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nudge")
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// HTTP control API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Required in `X-Api-Key` when set. `NUDGE_API_KEY` takes precedence.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_port() -> u16 { 3100 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            api_key: None,
        }
    }
}

/// Chat network connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// "bridge" (WebSocket bridge to the network) or "loopback" (in-process, for development).
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Wait between reconnect attempts after a transient close.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// None = reconnect forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    /// None = wait for a scan indefinitely.
    #[serde(default)]
    pub provisioning_timeout_secs: Option<u64>,
    /// How long the bridge waits for a send acknowledgement.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
}

fn default_transport() -> String { "bridge".into() }
fn default_bridge_url() -> String { "ws://127.0.0.1:3200/session".into() }
fn default_reconnect_delay_secs() -> u64 { 3 }
fn default_ack_timeout_secs() -> u64 { 30 }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            bridge_url: default_bridge_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: None,
            provisioning_timeout_secs: None,
            ack_timeout_secs: default_ack_timeout_secs(),
        }
    }
}

/// Credential store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_credentials_path")]
    pub path: String,
}

fn default_credentials_path() -> String { "~/.nudge/auth.db".into() }

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self { path: default_credentials_path() }
    }
}

/// Outbound dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum gap between two consecutive network sends.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Country code that replaces the local trunk prefix.
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_trunk_prefix")]
    pub trunk_prefix: char,
    /// Domain suffix of the network's canonical address form.
    #[serde(default = "default_address_suffix")]
    pub address_suffix: String,
}

fn default_pacing_ms() -> u64 { 1000 }
fn default_queue_capacity() -> usize { 64 }
fn default_country_code() -> String { "62".into() }
fn default_trunk_prefix() -> char { '0' }
fn default_address_suffix() -> String { "@s.whatsapp.net".into() }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            queue_capacity: default_queue_capacity(),
            country_code: default_country_code(),
            trunk_prefix: default_trunk_prefix(),
            address_suffix: default_address_suffix(),
        }
    }
}

/// Daily reminder job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_reminder_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    /// Only these days of the month trigger a reminder.
    #[serde(default = "default_days_of_month")]
    pub days_of_month: Vec<u32>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// SQLite database of the admin application (read-only).
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_reminder_message")]
    pub message: String,
}

fn bool_true() -> bool { true }
fn default_reminder_hour() -> u32 { 9 }
fn default_days_of_month() -> Vec<u32> { vec![25, 26, 27, 28] }
fn default_timezone() -> String { "Asia/Jakarta".into() }
fn default_database_path() -> String { "~/.nudge/records.db".into() }
fn default_reminder_message() -> String {
    "Halo! Laporan kegiatan bulan ini belum kami terima. Mohon segera diisi sebelum akhir bulan. Terima kasih.".into()
}

impl ReminderConfig {
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|e| NudgeError::config(format!("Unknown timezone {:?}: {e}", self.timezone)))
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: default_reminder_hour(),
            minute: 0,
            days_of_month: default_days_of_month(),
            timezone: default_timezone(),
            database_path: default_database_path(),
            message: default_reminder_message(),
        }
    }
}
