use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const CONFIG_PATH_ENV: &str = "OPENAI_CLI_CONFIG_PATH";

const CONFIG_DIR_NAME: &str = ".openai-cli";
const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_TEMPERATURE: f64 = 1.0;
const MIN_TEMPERATURE: f64 = 0.0;
const MAX_TEMPERATURE: f64 = 2.0;
const MASKED_API_KEY: &str = "****";
const NOT_SET: &str = "not set";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Json => "json",
            Self::Markdown => "markdown",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "plain" => Some(Self::Plain),
            "json" => Some(Self::Json),
            "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Keys accepted by `config get`/`config set`, in listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ApiKey,
    DefaultModel,
    OutputFormat,
    Temperature,
    MaxTokens,
    Provider,
    BaseUrl,
    Debug,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 8] = [
        Self::ApiKey,
        Self::DefaultModel,
        Self::OutputFormat,
        Self::Temperature,
        Self::MaxTokens,
        Self::Provider,
        Self::BaseUrl,
        Self::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api-key",
            Self::DefaultModel => "default-model",
            Self::OutputFormat => "output-format",
            Self::Temperature => "temperature",
            Self::MaxTokens => "max-tokens",
            Self::Provider => "provider",
            Self::BaseUrl => "base-url",
            Self::Debug => "debug",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == raw)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted settings record. Field names on disk are camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub default_model: String,
    pub output_format: OutputFormat,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_enabled: Option<bool>,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            output_format: OutputFormat::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            provider: None,
            base_url: None,
            debug_enabled: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown configuration key: '{0}'")]
    UnknownKey(String),
    #[error("Invalid value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },
    #[error("failed to write configuration to {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize configuration")]
    Serialize(#[from] serde_json::Error),
    #[error("could not determine home directory for the configuration file")]
    NoHomeDir,
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Settings loaded once from disk, with the credential overridable from the
/// environment on every lookup.
pub struct ConfigStore {
    path: PathBuf,
    record: ConfigRecord,
    env_lookup: EnvLookup,
}

impl ConfigStore {
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path(|key| env::var(key).ok())?;
        Ok(Self::load(path))
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self::load_with_env(path, |key| env::var(key).ok())
    }

    pub fn load_with_env(
        path: impl Into<PathBuf>,
        env_lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let path = path.into();
        let record = read_record(&path);
        Self {
            path,
            record,
            env_lookup: Box::new(env_lookup),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    /// Environment first, then the stored key.
    pub fn resolve_api_key(&self) -> Option<String> {
        (self.env_lookup)(API_KEY_ENV)
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.record.api_key.clone())
    }

    pub fn default_model(&self) -> &str {
        &self.record.default_model
    }

    pub fn output_format(&self) -> OutputFormat {
        self.record.output_format
    }

    pub fn temperature(&self) -> f64 {
        self.record.temperature
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.record.max_tokens
    }

    pub fn provider(&self) -> Option<&str> {
        self.record.provider.as_deref()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.record.base_url.as_deref()
    }

    pub fn debug_enabled(&self) -> bool {
        self.record.debug_enabled.unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        ConfigKey::parse(key).and_then(|key| self.value_of(key))
    }

    fn value_of(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::ApiKey => self.resolve_api_key(),
            ConfigKey::DefaultModel => Some(self.record.default_model.clone()),
            ConfigKey::OutputFormat => Some(self.record.output_format.as_str().to_string()),
            ConfigKey::Temperature => Some(format_temperature(self.record.temperature)),
            ConfigKey::MaxTokens => self.record.max_tokens.map(|tokens| tokens.to_string()),
            ConfigKey::Provider => self.record.provider.clone(),
            ConfigKey::BaseUrl => self.record.base_url.clone(),
            ConfigKey::Debug => self.record.debug_enabled.map(|flag| flag.to_string()),
        }
    }

    /// Validates `value` for `key`, rewrites the file, then updates the record.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let config_key =
            ConfigKey::parse(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        let mut record = self.record.clone();
        match config_key {
            ConfigKey::ApiKey => record.api_key = Some(value.to_string()),
            ConfigKey::DefaultModel => record.default_model = value.to_string(),
            ConfigKey::OutputFormat => {
                record.output_format = OutputFormat::parse(value).ok_or_else(invalid)?;
            }
            ConfigKey::Temperature => {
                record.temperature = parse_temperature(value).ok_or_else(invalid)?;
            }
            ConfigKey::MaxTokens => {
                record.max_tokens = Some(parse_max_tokens(value).ok_or_else(invalid)?);
            }
            ConfigKey::Provider => record.provider = Some(value.to_string()),
            ConfigKey::BaseUrl => record.base_url = Some(value.to_string()),
            ConfigKey::Debug => record.debug_enabled = Some(parse_truthy(value)),
        }

        // The in-memory record only changes once the file does.
        write_record(&self.path, &record)?;
        self.record = record;
        debug!(key = %config_key, "updated configuration value");
        Ok(())
    }

    /// Every recognized key with its display value. The credential is masked.
    pub fn list_all(&self) -> Vec<(ConfigKey, String)> {
        ConfigKey::ALL
            .into_iter()
            .map(|key| {
                let value = match key {
                    ConfigKey::ApiKey => self
                        .resolve_api_key()
                        .map(|_| MASKED_API_KEY.to_string()),
                    _ => self.value_of(key),
                };
                (key, value.unwrap_or_else(|| NOT_SET.to_string()))
            })
            .collect()
    }
}

pub fn default_config_path(
    get_var: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_var(CONFIG_PATH_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        return Ok(PathBuf::from(path));
    }

    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn write_record(path: &Path, record: &ConfigRecord) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(record)?;

    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| write_error(parent, source))?;
    }

    // Write beside the target and rename so a crash never leaves half a file.
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(|source| write_error(&tmp_path, source))?;
    fs::rename(&tmp_path, path).map_err(|source| write_error(path, source))?;

    debug!(path = %path.display(), "configuration saved");
    Ok(())
}

fn write_error(path: &Path, source: io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_record(path: &Path) -> ConfigRecord {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return ConfigRecord::default();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read configuration, using defaults");
            return ConfigRecord::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(record) => {
            debug!(path = %path.display(), "loaded configuration");
            record
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to parse configuration, using defaults");
            ConfigRecord::default()
        }
    }
}

fn format_temperature(value: f64) -> String {
    format!("{value:?}")
}

fn parse_temperature(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(value))
}

fn parse_max_tokens(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|value| *value > 0)
}

fn parse_truthy(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true") || raw == "1"
}
