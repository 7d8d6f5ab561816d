use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173,http://localhost:3000";

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub use_lm_studio: bool,
    pub lm_studio_base_url: String,
    pub lm_studio_model: Option<String>,
    pub gemini_api_key: Option<SecretString>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub cors_origins: Vec<String>,
    pub prompts_dir: Option<PathBuf>,
    pub close_grace: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// A `.env` file in the current directory is read first. Recognised variables:
    ///
    /// *   `BIND_ADDRESS`: Address the server listens on. Defaults to "0.0.0.0:8000".
    /// *   `USE_LM_STUDIO`: Prefer the local LM Studio provider. Defaults to true.
    /// *   `LM_STUDIO_BASE_URL`: LM Studio endpoint. Defaults to "http://localhost:1234".
    /// *   `LM_STUDIO_MODEL`: (Optional) Model id; detected from the server when unset.
    /// *   `GEMINI_API_KEY`: Gemini credential. Required when `USE_LM_STUDIO` is false.
    /// *   `GEMINI_MODEL`: Gemini model. Defaults to "gemini-pro".
    /// *   `GEMINI_BASE_URL`: Gemini REST endpoint.
    /// *   `CORS_ORIGINS`: Comma-separated list of allowed origins.
    /// *   `PROMPTS_DIR`: (Optional) Directory holding `system.md` / `opening.md` overrides.
    /// *   `CLOSE_GRACE_MS`: Delay before closing a connection whose interview failed to start.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let use_lm_studio = match var("USE_LM_STUDIO") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "USE_LM_STUDIO".to_string(),
                    format!("'{value}' is not a boolean"),
                )
            })?,
            None => true,
        };

        let lm_studio_base_url = var("LM_STUDIO_BASE_URL")
            .unwrap_or_else(|| "http://localhost:1234".to_string())
            .trim_end_matches('/')
            .to_string();
        if !lm_studio_base_url.starts_with("http://") && !lm_studio_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "LM_STUDIO_BASE_URL".to_string(),
                format!("'{lm_studio_base_url}' must start with http:// or https://"),
            ));
        }
        let lm_studio_model = var("LM_STUDIO_MODEL");

        let gemini_api_key = var("GEMINI_API_KEY").map(SecretString::from);
        let gemini_model = var("GEMINI_MODEL")
            .unwrap_or_else(|| interview_core::gemini::DEFAULT_MODEL.to_string());
        let gemini_base_url = var("GEMINI_BASE_URL")
            .unwrap_or_else(|| interview_core::gemini::DEFAULT_BASE_URL.to_string());

        let cors_origins = var("CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let prompts_dir = var("PROMPTS_DIR").map(PathBuf::from);

        let close_grace = match var("CLOSE_GRACE_MS") {
            Some(value) => value.parse::<u64>().map(Duration::from_millis).map_err(|e| {
                ConfigError::InvalidValue("CLOSE_GRACE_MS".to_string(), e.to_string())
            })?,
            None => Duration::from_millis(1000),
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // Without LM Studio the hosted provider is the only way to run an interview.
        if !use_lm_studio && gemini_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "GEMINI_API_KEY must be set when USE_LM_STUDIO is false".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            use_lm_studio,
            lm_studio_base_url,
            lm_studio_model,
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            cors_origins,
            prompts_dir,
            close_grace,
            log_level,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
