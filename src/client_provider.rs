use std::env;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConfigStore;
use crate::providers::openai::{DEFAULT_BASE_URL, OpenAiClient};

const TIMEOUT_ENV: &str = "OPENAI_TIMEOUT_SECS";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(
        "No OpenAI API key configured. Set the OPENAI_API_KEY environment variable \
         or run `openai-cli config set api-key <key>`."
    )]
    NoCredential,
    #[error("Failed to initialize HTTP client")]
    Build(#[source] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Default,
    Custom { provider: String, base_url: String },
}

/// Everything needed to construct a client, resolved from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_key: String,
    pub endpoint: Endpoint,
    pub debug: bool,
}

impl ClientSettings {
    /// `None` when no credential resolves. A custom endpoint needs both
    /// `provider` and `base-url`.
    pub fn from_store(store: &ConfigStore) -> Option<Self> {
        let api_key = store.resolve_api_key()?;
        let endpoint = match (store.provider(), store.base_url()) {
            (Some(provider), Some(base_url)) => Endpoint::Custom {
                provider: provider.to_string(),
                base_url: base_url.to_string(),
            },
            _ => Endpoint::Default,
        };

        Some(Self {
            api_key,
            endpoint,
            debug: store.debug_enabled(),
        })
    }
}

pub trait ClientFactory {
    type Client;

    fn build(&self, settings: &ClientSettings) -> Result<Self::Client, reqwest::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenAiClientFactory {
    timeout_secs: u64,
}

impl OpenAiClientFactory {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    fn from_env_with(get_var: impl Fn(&str) -> Option<String>) -> Self {
        Self::new(parse_timeout_secs(get_var(TIMEOUT_ENV).as_deref()))
    }
}

impl Default for OpenAiClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl ClientFactory for OpenAiClientFactory {
    type Client = OpenAiClient;

    fn build(&self, settings: &ClientSettings) -> Result<OpenAiClient, reqwest::Error> {
        // No overall deadline here: a streamed reply may outlive it. Plain
        // requests get one per call from the client.
        let timeout = Duration::from_secs(self.timeout_secs);
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        let base_url = match &settings.endpoint {
            Endpoint::Default => DEFAULT_BASE_URL,
            Endpoint::Custom { provider, base_url } => {
                debug!(provider = %provider, base_url = %base_url, "using custom API endpoint");
                base_url.as_str()
            }
        };

        Ok(OpenAiClient::new(
            http,
            base_url,
            settings.api_key.clone(),
            settings.debug,
            self.timeout_secs,
        ))
    }
}

/// Builds the API client on first use and hands out the same instance after.
///
/// Settings are read when the client is first built; later changes to the
/// store are not picked up by an existing provider.
pub struct ClientProvider<'a, F: ClientFactory = OpenAiClientFactory> {
    store: &'a ConfigStore,
    factory: F,
    cached: Mutex<Option<Arc<F::Client>>>,
}

impl<'a> ClientProvider<'a> {
    pub fn new(store: &'a ConfigStore) -> Self {
        Self::with_factory(store, OpenAiClientFactory::from_env())
    }
}

impl<'a, F: ClientFactory> ClientProvider<'a, F> {
    pub fn with_factory(store: &'a ConfigStore, factory: F) -> Self {
        Self {
            store,
            factory,
            cached: Mutex::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn get_client(&self) -> Result<Arc<F::Client>, ClientError> {
        let Some(settings) = ClientSettings::from_store(self.store) else {
            warn!("no API key found in environment or configuration");
            return Err(ClientError::NoCredential);
        };

        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = cached.as_ref() {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(self.factory.build(&settings).map_err(ClientError::Build)?);
        debug!(
            custom_endpoint = matches!(settings.endpoint, Endpoint::Custom { .. }),
            debug_enabled = settings.debug,
            "constructed API client"
        );
        *cached = Some(Arc::clone(&client));
        Ok(client)
    }
}

fn parse_timeout_secs(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}
