use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Half-width of the due-window around each reminder target, in minutes.
/// Symmetric so that a slightly early or slightly late tick still catches
/// the reminder exactly once.
pub const DEFAULT_TOLERANCE_MINUTES: i64 = 30;
/// How often the orchestrator ticks (seconds). Well inside the tolerance
/// window so no reminder slips between ticks.
pub const DEFAULT_TICK_SECS: u64 = 300;
/// Transient failures beyond this attempt count become dead.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Per-dispatch network timeout (seconds). A timed-out dispatch counts as
/// a transient failure.
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;

/// Top-level config (lembra.toml + LEMBRA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LembraConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub clinic: ClinicConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Default for LembraConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            clinic: ClinicConfig::default(),
            scheduler: SchedulerConfig::default(),
            outbox: OutboxConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Clinic identity rendered into every message, plus the clinic's UTC
/// offset — all appointment times are clinic-local (America/Sao_Paulo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicConfig {
    #[serde(default = "default_clinic_name")]
    pub name: String,
    #[serde(default = "default_doctor_name")]
    pub doctor: String,
    #[serde(default = "default_clinic_phone")]
    pub phone: String,
    #[serde(default = "default_clinic_email")]
    pub email: String,
    /// Minutes east of UTC. Sao Paulo is UTC-3 year-round since 2019.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            name: default_clinic_name(),
            doctor: default_doctor_name(),
            phone: default_clinic_phone(),
            email: default_clinic_email(),
            utc_offset_minutes: default_utc_offset(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Lead times (hours before the appointment) at which reminders fire.
    #[serde(default = "default_lead_hours")]
    pub lead_hours: Vec<u32>,
    #[serde(default = "default_tolerance_minutes")]
    pub tolerance_minutes: i64,
    /// How far past its window a missed reminder may still be sent.
    /// 0 means missed reminders are always skipped.
    #[serde(default)]
    pub grace_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            lead_hours: default_lead_hours(),
            tolerance_minutes: default_tolerance_minutes(),
            grace_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// Messages claimed per drain pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub email: Option<EmailProviderConfig>,
    pub sms: Option<SmsProviderConfig>,
}

/// Resend email provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailProviderConfig {
    pub api_key: String,
    /// Sender address, e.g. `"Saraiva Vision <contato@saraivavision.com.br>"`.
    pub from: String,
    #[serde(default = "default_resend_base_url")]
    pub base_url: String,
}

/// Zenvia SMS provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsProviderConfig {
    pub api_token: String,
    /// Zenvia sender identifier.
    pub from: String,
    #[serde(default = "default_zenvia_base_url")]
    pub base_url: String,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.lembra/lembra.db")
}
fn default_clinic_name() -> String {
    "Saraiva Vision".to_string()
}
fn default_doctor_name() -> String {
    "Dr. Philipe Saraiva".to_string()
}
fn default_clinic_phone() -> String {
    "(33) 99999-9999".to_string()
}
fn default_clinic_email() -> String {
    "contato@saraivavision.com.br".to_string()
}
fn default_utc_offset() -> i32 {
    -180
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_lead_hours() -> Vec<u32> {
    vec![24, 2]
}
fn default_tolerance_minutes() -> i64 {
    DEFAULT_TOLERANCE_MINUTES
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_dispatch_timeout_secs() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_SECS
}
fn default_batch_size() -> u32 {
    25
}
fn default_resend_base_url() -> String {
    "https://api.resend.com".to_string()
}
fn default_zenvia_base_url() -> String {
    "https://api.zenvia.com".to_string()
}

impl LembraConfig {
    /// Load config from a TOML file with LEMBRA_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.lembra/lembra.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: LembraConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LEMBRA_").split("_"))
            .extract()
            .map_err(|e| crate::error::LembraError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.lembra/lembra.toml")
}
