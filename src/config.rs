use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::assignment::AssignmentSettings;
use crate::error::AppError;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}, expected compact or json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub bus_partitions: usize,
    pub event_buffer_size: usize,
    pub search_radius_km: f64,
    pub candidate_limit: usize,
    pub max_claim_attempts: usize,
    pub external_timeout: Duration,
    pub redelivery_backoff: Duration,
    pub mapbox_token: String,
    pub mapbox_base_url: String,
    pub restaurant_service_url: String,
    pub courier_service_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let bus_partitions: usize = parse_or_default("BUS_PARTITIONS", 4)?;
        if bus_partitions == 0 {
            return Err(AppError::Internal("BUS_PARTITIONS must be > 0".to_string()));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            bus_partitions,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", 100.0)?,
            candidate_limit: parse_or_default("CANDIDATE_LIMIT", 10)?,
            max_claim_attempts: parse_or_default("MAX_CLAIM_ATTEMPTS", 10)?,
            external_timeout: Duration::from_secs(parse_or_default("EXTERNAL_TIMEOUT_SECS", 5)?),
            redelivery_backoff: Duration::from_millis(parse_or_default(
                "REDELIVERY_BACKOFF_MS",
                500,
            )?),
            mapbox_token: env::var("MAPBOX_TOKEN").unwrap_or_default(),
            mapbox_base_url: env::var("MAPBOX_BASE_URL")
                .unwrap_or_else(|_| "https://api.mapbox.com".to_string()),
            restaurant_service_url: env::var("RESTAURANT_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8082".to_string()),
            courier_service_url: env::var("COURIER_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8083".to_string()),
        })
    }

    pub fn assignment_settings(&self) -> AssignmentSettings {
        AssignmentSettings {
            radius_km: self.search_radius_km,
            max_claim_attempts: self.max_claim_attempts,
            call_timeout: self.external_timeout,
        }
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
