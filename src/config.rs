use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::geo::{EtaModel, FeeSchedule};

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub jwt_secret: String,
    pub location_ttl_secs: u64,
    pub location_history_ttl_secs: u64,
    pub fee_schedule: FeeSchedule,
    pub eta_model: EtaModel,
    pub tax_rate: f64,
    pub default_service_radius_km: f64,
    pub assign_timeout: Duration,
    pub subscriber_buffer_size: usize,
    pub cache_sweep_interval: Duration,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl Config {
    /// Built-in defaults around a signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            jwt_secret: jwt_secret.into(),
            location_ttl_secs: 300,
            location_history_ttl_secs: 3600,
            fee_schedule: FeeSchedule::default(),
            eta_model: EtaModel::default(),
            tax_rate: 0.05,
            default_service_radius_km: 5.0,
            assign_timeout: Duration::from_millis(2000),
            subscriber_buffer_size: 64,
            cache_sweep_interval: Duration::from_secs(30),
            redis_url: None,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Internal("JWT_SECRET must be set".to_string()))?;
        if jwt_secret.trim().is_empty() {
            return Err(AppError::Internal("JWT_SECRET cannot be empty".to_string()));
        }

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let defaults = Self::new(jwt_secret);
        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            location_ttl_secs: parse_or_default("LOCATION_TTL_SECS", defaults.location_ttl_secs)?,
            location_history_ttl_secs: parse_or_default(
                "LOCATION_HISTORY_TTL_SECS",
                defaults.location_history_ttl_secs,
            )?,
            fee_schedule: FeeSchedule {
                base_fee: parse_or_default("BASE_DELIVERY_FEE", defaults.fee_schedule.base_fee)?,
                per_km_fee: parse_or_default("PER_KM_FEE", defaults.fee_schedule.per_km_fee)?,
                free_distance_km: parse_or_default(
                    "FREE_DISTANCE_KM",
                    defaults.fee_schedule.free_distance_km,
                )?,
            },
            eta_model: EtaModel {
                base_minutes: parse_or_default("ETA_BASE_MINUTES", defaults.eta_model.base_minutes)?,
                avg_speed_kmh: parse_or_default("AVG_SPEED_KMH", defaults.eta_model.avg_speed_kmh)?,
            },
            tax_rate: parse_or_default("TAX_RATE", defaults.tax_rate)?,
            default_service_radius_km: parse_or_default(
                "DEFAULT_SERVICE_RADIUS_KM",
                defaults.default_service_radius_km,
            )?,
            assign_timeout: Duration::from_millis(parse_or_default(
                "ASSIGN_TIMEOUT_MS",
                defaults.assign_timeout.as_millis() as u64,
            )?),
            subscriber_buffer_size: parse_or_default(
                "SUBSCRIBER_BUFFER_SIZE",
                defaults.subscriber_buffer_size,
            )?,
            cache_sweep_interval: Duration::from_secs(parse_or_default(
                "CACHE_SWEEP_INTERVAL_SECS",
                defaults.cache_sweep_interval.as_secs(),
            )?),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            jwt_secret: defaults.jwt_secret,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.location_ttl_secs == 0 || self.location_history_ttl_secs == 0 {
            return Err(AppError::Internal("location TTLs must be > 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.tax_rate) {
            return Err(AppError::Internal("TAX_RATE must be in [0, 1)".to_string()));
        }
        if self.default_service_radius_km <= 0.0 {
            return Err(AppError::Internal(
                "DEFAULT_SERVICE_RADIUS_KM must be > 0".to_string(),
            ));
        }
        if self.eta_model.avg_speed_kmh <= 0.0 {
            return Err(AppError::Internal("AVG_SPEED_KMH must be > 0".to_string()));
        }
        if self.subscriber_buffer_size == 0 {
            return Err(AppError::Internal(
                "SUBSCRIBER_BUFFER_SIZE must be > 0".to_string(),
            ));
        }
        if self.cache_sweep_interval.is_zero() {
            return Err(AppError::Internal(
                "CACHE_SWEEP_INTERVAL_SECS must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
