use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_PROVIDER: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const SUPPORTED_PROVIDERS: &[&str] = &["gemini"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for the Fahari tools
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FahariConfig {
    /// Generative model settings shared by CivicLens and the legal assistant
    #[serde(default)]
    pub ai: AiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Generative model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider name. Only "gemini" is wired up.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier (e.g., "gemini-3-flash-preview")
    #[serde(default = "default_model")]
    pub model: String,

    /// API key. Read from config or GEMINI_API_KEY; never written back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    /// Base URL of the Generative Language REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature; the service default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Ask the service to ground CivicLens answers with web search
    #[serde(default = "default_google_search")]
    pub google_search: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            temperature: None,
            google_search: default_google_search(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty" or "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_google_search() -> bool {
    true
}
// Keep stderr quiet around rendered results
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

/// Configuration manager layering `.env`, a TOML file and environment overrides
pub struct ConfigManager {
    config: FahariConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (a `.env` file is loaded first)
    /// 2. Config file (explicit path, `./.fahari.toml` or `~/.fahari/config.toml`)
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => Self::discover_config_file()?,
        };

        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        match &config_path {
            Some(path) => info!("Loaded configuration from {}", path.display()),
            None => info!("No config file found, using defaults"),
        }
        debug!(
            provider = %config.ai.provider,
            model = %config.ai.model,
            api_key_set = config.ai.api_key.is_some(),
            "AI configuration"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Build a manager around an already assembled configuration
    pub fn from_config(config: FahariConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".fahari.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .fahari.env: {}", e);
                }
            }
        }
    }

    fn discover_config_file() -> Result<(FahariConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".fahari.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(user_config) = Self::user_config_path() {
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((FahariConfig::default(), None))
    }

    /// `~/.fahari/config.toml`, if a home directory is known
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".fahari").join("config.toml"))
    }

    pub fn read_toml_file(path: &Path) -> Result<FahariConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply environment overrides. `lookup` resolves a variable name to its value.
    pub fn apply_env_overrides<F>(mut config: FahariConfig, lookup: F) -> FahariConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_blank("GEMINI_API_KEY").or_else(|| non_blank("FAHARI_API_KEY")) {
            config.ai.api_key = Some(SecretString::from(key));
        }
        if let Some(provider) = lookup("FAHARI_PROVIDER") {
            config.ai.provider = provider;
        }
        if let Some(model) = lookup("FAHARI_MODEL") {
            config.ai.model = model;
        }
        if let Some(url) = lookup("FAHARI_BASE_URL") {
            config.ai.base_url = url;
        }
        if let Some(timeout) = lookup("FAHARI_TIMEOUT_SECS") {
            match timeout.parse() {
                Ok(secs) => config.ai.timeout_secs = secs,
                Err(_) => warn!("Ignoring non-numeric FAHARI_TIMEOUT_SECS: {}", timeout),
            }
        }
        if let Some(temp) = lookup("FAHARI_TEMPERATURE") {
            match temp.parse() {
                Ok(t) => config.ai.temperature = Some(t),
                Err(_) => warn!("Ignoring invalid FAHARI_TEMPERATURE: {}", temp),
            }
        }
        if let Some(search) = lookup("FAHARI_GOOGLE_SEARCH") {
            config.ai.google_search = matches!(search.to_lowercase().as_str(), "true" | "1");
        }

        if let Some(level) = lookup("RUST_LOG") {
            // Only plain levels override; directive strings are left to EnvFilter
            if LOG_LEVELS.contains(&level.as_str()) {
                config.logging.level = level;
            }
        }

        config
    }

    pub fn validate_config(config: &FahariConfig) -> Result<(), ConfigError> {
        let provider = config.ai.provider.to_lowercase();
        if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid AI provider: {}. Must be one of: {}",
                config.ai.provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }

        if config.ai.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ai.model cannot be empty".to_string(),
            ));
        }

        if config.ai.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ai.base_url cannot be empty".to_string(),
            ));
        }

        if config.ai.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "ai.timeout_secs must be > 0".to_string(),
            ));
        }

        if let Some(t) = config.ai.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(format!(
                    "ai.temperature must be within 0.0..=2.0, got {}",
                    t
                )));
            }
        }

        if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        if !LOG_FORMATS.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {}. Must be one of: {}",
                config.logging.format,
                LOG_FORMATS.join(", ")
            )));
        }

        Ok(())
    }

    pub fn config(&self) -> &FahariConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FahariConfig {
        &mut self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write a default config file. Secrets are never serialized.
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = FahariConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            }
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
