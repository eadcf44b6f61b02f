use async_openai::config::OpenAIConfig;
use barkeep_core::controller::DEFAULT_MAX_TURNS;
use std::path::PathBuf;
use tracing::Level;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Chat backends reachable through the OpenAI-compatible API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    /// JSON label policy replacing the built-in alphabets and weights.
    pub labels_path: Option<PathBuf>,
    pub friendliness_threshold: f64,
    pub max_turns: usize,
    pub transcript_path: Option<PathBuf>,
    pub stream_replies: bool,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{other}' is not one of 'openai', 'gemini'"),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));
        let labels_path = std::env::var("LABELS_PATH").ok().map(PathBuf::from);
        let transcript_path = std::env::var("TRANSCRIPT_PATH").ok().map(PathBuf::from);

        let friendliness_threshold = parse_var("FRIENDLINESS_THRESHOLD", 5.0_f64)?;
        if !friendliness_threshold.is_finite() {
            return Err(ConfigError::InvalidValue(
                "FRIENDLINESS_THRESHOLD".to_string(),
                "must be a finite number".to_string(),
            ));
        }
        let max_turns = parse_var("MAX_TURNS", DEFAULT_MAX_TURNS)?;
        if max_turns == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TURNS".to_string(),
                "must be positive".to_string(),
            ));
        }
        let stream_replies = parse_var("STREAM_REPLIES", true)?;

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            log_level,
            prompts_path,
            labels_path,
            friendliness_threshold,
            max_turns,
            transcript_path,
            stream_replies,
        })
    }

    /// Client configuration for the selected provider.
    pub fn api_config(&self) -> Result<OpenAIConfig, ConfigError> {
        let (key, base, var) = match self.provider {
            Provider::OpenAI => (&self.openai_api_key, OPENAI_API_BASE, "OPENAI_API_KEY"),
            Provider::Gemini => (&self.gemini_api_key, GEMINI_API_BASE, "GEMINI_API_KEY"),
        };
        let key = key.as_ref().ok_or_else(|| ConfigError::MissingVar(var.to_string()))?;
        Ok(OpenAIConfig::new().with_api_key(key).with_api_base(base))
    }
}
