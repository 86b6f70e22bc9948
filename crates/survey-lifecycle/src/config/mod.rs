use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecyclePolicy;
use crate::notifications::DEFAULT_MAX_NOTIFICATIONS;

/// Upper bound for the expiry and warning windows, in days.
pub const MAX_POLICY_DAYS: i64 = 36_500;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub lifecycle: LifecycleConfig,
    pub notifications: NotificationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = LifecyclePolicy::default();
        let policy = LifecyclePolicy {
            expiry_days: env_number("SURVEY_EXPIRY_DAYS", defaults.expiry_days)?,
            warning_days: env_number("SURVEY_WARNING_DAYS", defaults.warning_days)?,
            follow_up_risk_threshold: env_number(
                "SURVEY_FOLLOW_UP_RISK",
                defaults.follow_up_risk_threshold,
            )?,
        };
        if !(1..=MAX_POLICY_DAYS).contains(&policy.expiry_days)
            || !(0..=MAX_POLICY_DAYS).contains(&policy.warning_days)
        {
            return Err(ConfigError::InvalidPolicy {
                expiry_days: policy.expiry_days,
                warning_days: policy.warning_days,
            });
        }

        let batch_size = env_number("SURVEY_BATCH_SIZE", LifecycleConfig::DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "SURVEY_BATCH_SIZE",
                value: "0".to_string(),
            });
        }
        let tick_secs = env_number(
            "SURVEY_TICK_INTERVAL_SECS",
            LifecycleConfig::DEFAULT_TICK_INTERVAL.as_secs(),
        )?;

        let capacity = env_number("NOTIFICATIONS_MAX", DEFAULT_MAX_NOTIFICATIONS)?;
        let store_path = env::var("NOTIFICATIONS_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("notifications.json"));

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            lifecycle: LifecycleConfig {
                policy,
                batch_size,
                tick_interval: Duration::from_secs(tick_secs.max(1)),
            },
            notifications: NotificationConfig {
                capacity,
                store_path,
            },
        })
    }
}

fn env_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
        }
        _ => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// State derivation thresholds and processing cadence.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub policy: LifecyclePolicy,
    pub batch_size: usize,
    pub tick_interval: Duration,
}

impl LifecycleConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(300);
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            policy: LifecyclePolicy::default(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
            tick_interval: Self::DEFAULT_TICK_INTERVAL,
        }
    }
}

/// Notification capacity and where the active set is persisted.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub capacity: usize,
    pub store_path: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidNumber {
        key: &'static str,
        value: String,
    },
    InvalidPolicy {
        expiry_days: i64,
        warning_days: i64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a valid number (got '{value}')")
            }
            ConfigError::InvalidPolicy {
                expiry_days,
                warning_days,
            } => write!(
                f,
                "survey policy windows must be within 1..={MAX_POLICY_DAYS} (expiry) and 0..={MAX_POLICY_DAYS} (warning) days (got expiry={expiry_days}, warning={warning_days})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidPolicy { .. } => None,
        }
    }
}
