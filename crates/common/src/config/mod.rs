//! Configuration management for the booking core
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with TOLKBRIDGE__)
//! - Configuration files (config.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Booking rules
    #[serde(default)]
    pub booking: BookingConfig,

    /// Notification dispatch rules
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Push gateway credentials
    #[serde(default)]
    pub push: PushConfig,

    /// SMS gateway settings
    #[serde(default)]
    pub sms: SmsConfig,

    /// Transactional email settings
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BookingConfig {
    /// Lead time granted to immediate bookings, in minutes
    #[serde(default = "default_immediate_lead")]
    pub immediate_lead_minutes: i64,

    /// Hours before due below which a cancellation counts as late
    #[serde(default = "default_cancel_cutoff")]
    pub cancel_cutoff_hours: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    /// Hour (UTC) at which the night window opens
    #[serde(default = "default_night_start")]
    pub night_start_hour: u32,

    /// Hour (UTC) at which the night window closes
    #[serde(default = "default_night_end")]
    pub night_end_hour: u32,

    /// Hour (UTC) at which delayed pushes are released
    #[serde(default = "default_business_start")]
    pub business_start_hour: u32,

    /// Title shown on every push notification
    #[serde(default = "default_push_title")]
    pub push_title: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PushConfig {
    /// Push gateway application id
    #[serde(default)]
    pub app_id: String,

    /// Push gateway REST API key
    #[serde(default)]
    pub api_key: String,

    /// Push gateway endpoint
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SmsConfig {
    /// Sender number for outbound SMS
    #[serde(default)]
    pub from_number: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MailConfig {
    /// Sender address for transactional mail
    #[serde(default)]
    pub sender_email: String,

    /// Sender display name
    #[serde(default)]
    pub sender_name: String,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            immediate_lead_minutes: default_immediate_lead(),
            cancel_cutoff_hours: default_cancel_cutoff(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            night_start_hour: default_night_start(),
            night_end_hour: default_night_end(),
            business_start_hour: default_business_start(),
            push_title: default_push_title(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            booking: BookingConfig::default(),
            notify: NotifyConfig::default(),
            push: PushConfig::default(),
            sms: SmsConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("TOLKBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

fn default_immediate_lead() -> i64 {
    5
}

fn default_cancel_cutoff() -> i64 {
    24
}

fn default_night_start() -> u32 {
    22
}

fn default_night_end() -> u32 {
    6
}

fn default_business_start() -> u32 {
    9
}

fn default_push_title() -> String {
    "Tolkbridge".to_string()
}

fn default_push_endpoint() -> String {
    "https://onesignal.com/api/v1/notifications".to_string()
}

fn default_push_timeout() -> u64 {
    30
}
