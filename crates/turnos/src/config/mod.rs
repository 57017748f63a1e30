use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Weekday};

use crate::workflows::turnos::{SchedulingPolicy, ServiceWindow, StockPolicy, SweepPolicy};

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
    pub scheduling: SchedulingPolicy,
    pub sweep: SweepPolicy,
    pub storage: StorageConfig,
    pub identity_pepper: String,
    pub blocked_dates: Vec<NaiveDate>,
    /// Heading printed on confirmation documents.
    pub pharmacy_name: String,
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

        let window = ServiceWindow {
            days: parse_weekdays(&var_or("TURNOS_SERVICE_DAYS", "tue,thu"))?,
            opens_at: parse_time("TURNOS_WINDOW_START", &var_or("TURNOS_WINDOW_START", "13:00"))?,
            closes_at: parse_time("TURNOS_WINDOW_END", &var_or("TURNOS_WINDOW_END", "16:00"))?,
            slot_minutes: parse_positive("TURNOS_SLOT_MINUTES", 6)?,
        };
        if window.closes_at <= window.opens_at {
            return Err(ConfigError::InvalidValue {
                variable: "TURNOS_WINDOW_END",
                value: window.closes_at.to_string(),
            });
        }

        let stock_raw = var_or("TURNOS_STOCK_POLICY", "permissive");
        let stock_policy =
            StockPolicy::parse(&stock_raw).ok_or_else(|| ConfigError::InvalidValue {
                variable: "TURNOS_STOCK_POLICY",
                value: stock_raw.clone(),
            })?;

        let scheduling = SchedulingPolicy {
            monthly_quota: parse_positive("TURNOS_MONTHLY_QUOTA", 2)?,
            daily_capacity: parse_positive("TURNOS_DAILY_CAPACITY", 30)?,
            window,
            booking_horizon_days: parse_positive("TURNOS_BOOKING_HORIZON_DAYS", 60)?,
            cancel_lead_days: parse_number("TURNOS_CANCEL_LEAD_DAYS", 7)?,
            stock_policy,
        };

        let cutoff_hour = parse_number("TURNOS_SWEEP_CUTOFF_HOUR", 18)?;
        let sweep = SweepPolicy {
            cutoff: NaiveTime::from_hms_opt(cutoff_hour, 0, 0).ok_or_else(|| {
                ConfigError::InvalidValue {
                    variable: "TURNOS_SWEEP_CUTOFF_HOUR",
                    value: cutoff_hour.to_string(),
                }
            })?,
            interval: Duration::from_secs(u64::from(parse_positive(
                "TURNOS_SWEEP_INTERVAL_SECS",
                3600,
            )?)),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            scheduling,
            sweep,
            storage: StorageConfig {
                evidence_dir: PathBuf::from(var_or("TURNOS_EVIDENCE_DIR", "./data/evidence")),
            },
            identity_pepper: env::var("TURNOS_IDENTITY_PEPPER").unwrap_or_default(),
            blocked_dates: parse_dates(&env::var("TURNOS_BLOCKED_DATES").unwrap_or_default())?,
            pharmacy_name: var_or("TURNOS_PHARMACY_NAME", "Farmacia Solidaria"),
        })
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where uploaded evidence and generated documents are written.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub evidence_dir: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { variable, value } => {
                write!(f, "{variable} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

fn var_or(variable: &str, default: &str) -> String {
    env::var(variable).unwrap_or_else(|_| default.to_string())
}

fn parse_number(variable: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidValue {
                variable,
                value: raw,
            }),
        Err(_) => Ok(default),
    }
}

fn parse_positive(variable: &'static str, default: u32) -> Result<u32, ConfigError> {
    match parse_number(variable, default)? {
        0 => Err(ConfigError::InvalidValue {
            variable,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}

fn parse_time(variable: &'static str, raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| ConfigError::InvalidValue {
        variable,
        value: raw.to_string(),
    })
}

fn parse_weekdays(raw: &str) -> Result<Vec<Weekday>, ConfigError> {
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let day = part
            .parse::<Weekday>()
            .map_err(|_| ConfigError::InvalidValue {
                variable: "TURNOS_SERVICE_DAYS",
                value: raw.to_string(),
            })?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(ConfigError::InvalidValue {
            variable: "TURNOS_SERVICE_DAYS",
            value: raw.to_string(),
        });
    }
    Ok(days)
}

fn parse_dates(raw: &str) -> Result<Vec<NaiveDate>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            NaiveDate::parse_from_str(part, "%Y-%m-%d").map_err(|_| ConfigError::InvalidValue {
                variable: "TURNOS_BLOCKED_DATES",
                value: part.to_string(),
            })
        })
        .collect()
}
