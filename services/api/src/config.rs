//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;

use tracing::Level;

/// Gemini's OpenAI-compatible endpoint, used when only a Gemini key is configured.
const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("'{}' is not one of text, json", other)),
        }
    }
}

/// Credentials and model names for the OpenAI-compatible AI service.
#[derive(Clone, Debug)]
pub struct AiConfig {
    pub api_key: String,
    /// `None` keeps the client library's default endpoint.
    pub api_base: Option<String>,
    pub analysis_model: String,
    pub vision_model: String,
}

/// Object storage for product photos.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub public_url: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub log_format: LogFormat,
    pub ai: AiConfig,
    pub off_base_url: String,
    pub off_user_agent: String,
    pub storage: StorageConfig,
    pub history_limit: usize,
    pub annotation_queue_capacity: usize,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|value| !value.trim().is_empty());
        let required = |name: &str| var(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()));

        // --- Server and Database ---
        let bind_address: SocketAddr =
            parse_or(&var, "BIND_ADDRESS", "0.0.0.0:3000".parse().ok())?;
        let database_url = required("DATABASE_URL")?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;
        let log_format = parse_or(&var, "LOG_FORMAT", Some(LogFormat::Text))?;

        // --- AI Service ---
        let openai_api_key = var("OPENAI_API_KEY");
        let gemini_api_key = var("GEMINI_API_KEY");
        let (api_key, default_base) = match (openai_api_key, gemini_api_key) {
            (Some(key), _) => (key, None),
            (None, Some(key)) => (key, Some(GEMINI_OPENAI_BASE.to_string())),
            (None, None) => return Err(ConfigError::MissingVar("OPENAI_API_KEY".to_string())),
        };
        let ai = AiConfig {
            api_key,
            api_base: var("AI_API_BASE").or(default_base),
            analysis_model: var("ANALYSIS_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            vision_model: var("VISION_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
        };

        // --- Nutrition Database ---
        let off_base_url = var("OFF_BASE_URL")
            .unwrap_or_else(|| "https://world.openfoodfacts.org".to_string())
            .trim_end_matches('/')
            .to_string();
        let off_user_agent = var("OFF_USER_AGENT").unwrap_or_else(|| "nutriscan/0.1".to_string());

        // --- Object Storage ---
        let endpoint = var("S3_ENDPOINT").map(|e| e.trim_end_matches('/').to_string());
        let bucket = required("S3_BUCKET")?;
        let public_url = match var("S3_PUBLIC_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match &endpoint {
                Some(endpoint) => format!("{}/{}", endpoint, bucket),
                None => return Err(ConfigError::MissingVar("S3_PUBLIC_URL".to_string())),
            },
        };
        let storage = StorageConfig {
            endpoint,
            access_key: required("S3_ACCESS_KEY")?,
            secret_key: required("S3_SECRET_KEY")?,
            region: var("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            bucket,
            public_url,
        };

        // --- Pipeline Limits ---
        let history_limit = positive(&var, "HISTORY_LIMIT", 50)?;
        let annotation_queue_capacity = positive(&var, "ANNOTATION_QUEUE_CAPACITY", 64)?;
        let max_upload_bytes = positive(&var, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            log_format,
            ai,
            off_base_url,
            off_user_agent,
            storage,
            history_limit,
            annotation_queue_capacity,
            max_upload_bytes,
        })
    }
}

fn parse_or<T, V>(var: &V, name: &str, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => default.ok_or_else(|| ConfigError::MissingVar(name.to_string())),
    }
}

fn positive<V>(var: &V, name: &str, default: usize) -> Result<usize, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    let value = parse_or(var, name, Some(default))?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/nutriscan"),
        ("OPENAI_API_KEY", "sk-test"),
        ("S3_ENDPOINT", "http://localhost:9000/"),
        ("S3_BUCKET", "products"),
        ("S3_ACCESS_KEY", "minio"),
        ("S3_SECRET_KEY", "minio123"),
    ];

    #[test]
    fn defaults_are_applied() {
        let config = load(MINIMAL).expect("config");
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.ai.analysis_model, "gpt-4o-mini");
        assert_eq!(config.ai.api_base, None);
        assert_eq!(config.off_base_url, "https://world.openfoodfacts.org");
        assert_eq!(config.storage.public_url, "http://localhost:9000/products");
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.annotation_queue_capacity, 64);
        assert_eq!(config.max_upload_bytes, 10_485_760);
    }

    #[test]
    fn gemini_key_selects_the_gemini_endpoint() {
        let mut pairs: Vec<(&str, &str)> = MINIMAL
            .iter()
            .copied()
            .filter(|(k, _)| *k != "OPENAI_API_KEY")
            .collect();
        pairs.push(("GEMINI_API_KEY", "g-test"));
        let config = load(&pairs).expect("config");
        assert_eq!(config.ai.api_key, "g-test");
        assert_eq!(config.ai.api_base.as_deref(), Some(GEMINI_OPENAI_BASE));
    }

    #[test]
    fn missing_database_url_is_reported() {
        let pairs: Vec<(&str, &str)> = MINIMAL
            .iter()
            .copied()
            .filter(|(k, _)| *k != "DATABASE_URL")
            .collect();
        assert!(matches!(load(&pairs), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("HISTORY_LIMIT", "lots"));
        assert!(matches!(load(&pairs), Err(ConfigError::InvalidValue(v, _)) if v == "HISTORY_LIMIT"));

        let mut pairs = MINIMAL.to_vec();
        pairs.push(("ANNOTATION_QUEUE_CAPACITY", "0"));
        assert!(matches!(
            load(&pairs),
            Err(ConfigError::InvalidValue(v, _)) if v == "ANNOTATION_QUEUE_CAPACITY"
        ));
    }

    #[test]
    fn log_format_accepts_json() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("LOG_FORMAT", "JSON"));
        assert_eq!(load(&pairs).expect("config").log_format, LogFormat::Json);
    }
}
