use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::membership::{ResubmissionMode, RetryPolicy, WorkflowConfig};

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

/// Top-level configuration for the membership service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub workflow: WorkflowConfig,
    pub documents: DocumentConfig,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            workflow: load_workflow()?,
            documents: DocumentConfig {
                root: PathBuf::from(
                    env::var("DOCUMENT_ROOT").unwrap_or_else(|_| "./uploads".to_string()),
                ),
                public_base_url: env::var("DOCUMENT_PUBLIC_BASE_URL")
                    .unwrap_or_else(|_| "/files".to_string()),
            },
        })
    }
}

fn load_workflow() -> Result<WorkflowConfig, ConfigError> {
    let defaults = WorkflowConfig::default();

    let resubmission_mode = match env::var("MEMBERSHIP_RESUBMISSION_MODE") {
        Ok(raw) => raw
            .parse::<ResubmissionMode>()
            .map_err(|_| ConfigError::InvalidResubmissionMode { value: raw })?,
        Err(_) => defaults.resubmission_mode,
    };

    let summary_cache_ttl = parse_number::<u64>("MEMBERSHIP_SUMMARY_CACHE_TTL_SECS")?
        .map(Duration::from_secs)
        .unwrap_or(defaults.summary_cache_ttl);

    let conversation_page_size = match parse_number::<usize>("MEMBERSHIP_CONVERSATION_PAGE_SIZE")? {
        Some(0) => {
            return Err(ConfigError::InvalidNumber {
                name: "MEMBERSHIP_CONVERSATION_PAGE_SIZE",
            })
        }
        Some(size) => size,
        None => defaults.conversation_page_size,
    };

    let attempts = parse_number::<u32>("MEMBERSHIP_STORE_RETRY_ATTEMPTS")?
        .unwrap_or(defaults.store_retry.attempts);
    let backoff = parse_number::<u64>("MEMBERSHIP_STORE_RETRY_BACKOFF_MS")?
        .map(Duration::from_millis)
        .unwrap_or(defaults.store_retry.initial_backoff);

    Ok(WorkflowConfig {
        resubmission_mode,
        summary_cache_ttl,
        conversation_page_size,
        store_retry: RetryPolicy::new(attempts.max(1), backoff),
    })
}

fn parse_number<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name }),
        Err(_) => Ok(None),
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

/// Where uploaded attachments are written and how their URLs are formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConfig {
    pub root: PathBuf,
    pub public_base_url: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidResubmissionMode { value: String },
    InvalidNumber { name: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidResubmissionMode { value } => write!(
                f,
                "MEMBERSHIP_RESUBMISSION_MODE must be new_version or in_place, got '{value}'"
            ),
            ConfigError::InvalidNumber { name } => {
                write!(f, "{name} must be a positive whole number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidResubmissionMode { .. }
            | ConfigError::InvalidNumber { .. } => None,
        }
    }
}
