use crate::error::{LeadwatchError, Result};
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "leadwatch.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PollingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Keep the last-seen `updated_at` map on disk across restarts.
    #[serde(default)]
    pub persist_seen: bool,
}

fn default_interval_secs() -> u64 {
    900
}

fn default_batch_size() -> usize {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            persist_seen: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_vip_budget")]
    pub vip_budget: i64,
    #[serde(default = "default_important_budget")]
    pub important_budget: i64,
    #[serde(default = "default_medium_budget")]
    pub medium_budget: i64,
    #[serde(default = "default_stale_days")]
    pub stale_days: f64,
    #[serde(default = "default_stuck_days")]
    pub stuck_days: f64,
}

fn default_vip_budget() -> i64 {
    500_000
}

fn default_important_budget() -> i64 {
    100_000
}

fn default_medium_budget() -> i64 {
    50_000
}

fn default_stale_days() -> f64 {
    3.0
}

fn default_stuck_days() -> f64 {
    7.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            vip_budget: default_vip_budget(),
            important_budget: default_important_budget(),
            medium_budget: default_medium_budget(),
            stale_days: default_stale_days(),
            stuck_days: default_stuck_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Scores strictly above this re-enter the loop.
    #[serde(default = "default_retry_score")]
    pub retry_score: u8,
    #[serde(default = "default_task_text")]
    pub task_text: String,
    #[serde(default = "default_task_deadline_hours")]
    pub task_deadline_hours: i64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_score() -> u8 {
    70
}

fn default_task_text() -> String {
    "Contact the client (created automatically)".to_string()
}

fn default_task_deadline_hours() -> i64 {
    24
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_score: default_retry_score(),
            task_text: default_task_text(),
            task_deadline_hours: default_task_deadline_hours(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduleConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_morning")]
    pub morning: String,
    #[serde(default = "default_evening")]
    pub evening: String,
    #[serde(default = "default_weekly_day")]
    pub weekly_day: String,
    #[serde(default = "default_weekly_time")]
    pub weekly_time: String,
}

fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}

fn default_morning() -> String {
    "09:00".to_string()
}

fn default_evening() -> String {
    "18:00".to_string()
}

fn default_weekly_day() -> String {
    "mon".to_string()
}

fn default_weekly_time() -> String {
    "10:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            morning: default_morning(),
            evening: default_evening(),
            weekly_day: default_weekly_day(),
            weekly_time: default_weekly_time(),
        }
    }
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| LeadwatchError::InvalidConfig(format!("unknown timezone '{}'", self.timezone)))
    }

    pub fn morning_time(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.morning)
    }

    pub fn evening_time(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.evening)
    }

    pub fn weekly_at(&self) -> Result<(Weekday, NaiveTime)> {
        let day = self
            .weekly_day
            .parse::<Weekday>()
            .map_err(|_| LeadwatchError::InvalidConfig(format!("unknown weekday '{}'", self.weekly_day)))?;
        Ok((day, parse_hhmm(&self.weekly_time)?))
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| LeadwatchError::InvalidConfig(format!("invalid time '{s}': expected HH:MM")))
}

// ---------------------------------------------------------------------------
// OperatorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Where proposals and digests are delivered.
    #[serde(default)]
    pub id: Option<String>,
    /// Additional identities allowed to press buttons and run commands.
    #[serde(default)]
    pub allowed_ids: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_rate_limit() -> u32 {
    20
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            id: None,
            allowed_ids: Vec::new(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

impl OperatorConfig {
    /// The operator identity, or `ConfigurationMissing`.
    pub fn require_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LeadwatchError::ConfigurationMissing("operator.id".to_string()))
    }

    /// Every identity allowed to interact with the bot.
    pub fn authorized_ids(&self) -> Vec<String> {
        self.id
            .iter()
            .chain(self.allowed_ids.iter())
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_seen_db")]
    pub seen_db: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("data/leadwatch.sqlite")
}

fn default_seen_db() -> PathBuf {
    PathBuf::from("data/seen.redb")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            seen_db: default_seen_db(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base")]
    pub api_base: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Expected value of the webhook secret header, when set.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

fn default_gateway_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: default_gateway_base(),
            bot_token: None,
            timeout_secs: default_timeout(),
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    #[serde(default = "default_scorer_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_scorer_model")]
    pub model: String,
    #[serde(default = "default_scorer_timeout")]
    pub timeout_secs: u64,
}

fn default_scorer_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_scorer_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_scorer_timeout() -> u64 {
    60
}

fn default_timeout() -> u64 {
    30
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            api_base: default_scorer_base(),
            api_key: None,
            model: default_scorer_model(),
            timeout_secs: default_scorer_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on `/api/*` when set.
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Apply secret overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("LEADWATCH_CRM_TOKEN") {
            self.crm.access_token = Some(v);
        }
        if let Some(v) = get("LEADWATCH_BOT_TOKEN") {
            self.gateway.bot_token = Some(v);
        }
        if let Some(v) = get("LEADWATCH_SCORER_KEY") {
            self.scorer.api_key = Some(v);
        }
        if let Some(v) = get("LEADWATCH_OPERATOR_ID") {
            self.operator.id = Some(v);
        }
        if let Some(v) = get("LEADWATCH_API_TOKEN") {
            self.server.api_token = Some(v);
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        if self.operator.require_id().is_err() {
            warn(
                WarnLevel::Warning,
                "operator.id is not set: proposals and digests will not be delivered".into(),
            );
        }
        if self.polling.batch_size == 0 {
            warn(WarnLevel::Error, "polling.batch_size must be at least 1".into());
        }
        if self.polling.interval_secs == 0 {
            warn(WarnLevel::Error, "polling.interval_secs must be at least 1".into());
        }
        if self.crm.base_url.trim().is_empty() {
            warn(WarnLevel::Error, "crm.base_url is not set".into());
        }
        if self.crm.access_token.is_none() {
            warn(
                WarnLevel::Warning,
                "crm.access_token is not set (LEADWATCH_CRM_TOKEN)".into(),
            );
        }
        if self.gateway.bot_token.is_none() {
            warn(
                WarnLevel::Warning,
                "gateway.bot_token is not set (LEADWATCH_BOT_TOKEN)".into(),
            );
        }
        if self.scorer.api_key.is_none() {
            warn(
                WarnLevel::Warning,
                "scorer.api_key is not set (LEADWATCH_SCORER_KEY): batch scoring will fall back to defaults".into(),
            );
        }
        for result in [
            self.schedule.tz().map(|_| ()),
            self.schedule.morning_time().map(|_| ()),
            self.schedule.evening_time().map(|_| ()),
            self.schedule.weekly_at().map(|_| ()),
        ] {
            if let Err(e) = result {
                warn(WarnLevel::Error, e.to_string());
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
