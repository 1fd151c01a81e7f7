//! Fulfillment providers and the human-facing notifier.
//!
//! Real providers all speak the panel API v2 protocol and differ only by
//! endpoint and token, so one [`panel::PanelProvider`] serves each of them.
//! The `dummy` id maps to [`dummy::DummyProvider`], which places nothing.

pub mod dummy;
pub mod panel;
pub mod telegram;

use crate::config::AppConfig;
use crate::domain::model::ProviderId;
use crate::domain::ports::{Notifier, Provider};
use crate::utils::error::Result;
use reqwest::{Client, ClientBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use dummy::DummyProvider;
pub use panel::{PanelClient, PanelProvider};
pub use telegram::{LogNotifier, TelegramNotifier};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid API key: {0}")]
    InvalidCredential(String),

    #[error("Provider '{0}' has no token configured")]
    NotConfigured(ProviderId),

    #[error("No service id is mapped for this service")]
    MissingServiceId,

    #[error("Provider returned HTTP status {0}")]
    HttpStatus(u16),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection error: {0}")]
    Transport(String),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Unexpected provider response: {0}")]
    Decode(String),

    #[error("Attempts limit exceeded: {message}")]
    AttemptsExhausted { attempts: u32, message: String },
}

impl ProviderError {
    /// Fatal errors cannot be fixed by calling again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::InvalidCredential(_)
                | ProviderError::NotConfigured(_)
                | ProviderError::MissingServiceId
        )
    }

    pub fn is_credential_failure(&self) -> bool {
        matches!(self, ProviderError::InvalidCredential(_))
    }

    pub(crate) fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(timeout)
        } else if let Some(status) = e.status() {
            ProviderError::HttpStatus(status.as_u16())
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

pub fn build_http_client(timeout: Duration) -> Result<Client> {
    let client = ClientBuilder::new()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?;
    Ok(client)
}

/// Maps provider ids to ready-to-use implementations.
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry holding only the dummy fallback.
    pub fn new() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
        };
        registry.register(Arc::new(DummyProvider));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id(), provider);
    }

    /// Registers a panel provider for every real provider that has a token.
    pub fn from_config(config: &AppConfig, client: &Client) -> Self {
        let mut registry = Self::new();
        for id in ProviderId::ALL.into_iter().filter(|id| !id.is_dummy()) {
            match PanelClient::from_config(config, id, client.clone()) {
                Ok(panel) => {
                    tracing::debug!("Registered provider {} at {}", id, panel.endpoint());
                    registry.register(Arc::new(PanelProvider::new(panel, config.retry.policy())));
                }
                Err(e) => tracing::debug!("Provider {} skipped: {}", id, e),
            }
        }
        registry
    }

    pub fn get(&self, id: ProviderId) -> ProviderResult<Arc<dyn Provider>> {
        self.providers
            .get(&id)
            .cloned()
            .ok_or(ProviderError::NotConfigured(id))
    }

    pub fn is_registered(&self, id: ProviderId) -> bool {
        self.providers.contains_key(&id)
    }
}

/// Telegram when a bot token and chat are configured, log output otherwise.
pub fn build_notifier(config: &AppConfig, client: &Client) -> Arc<dyn Notifier> {
    match TelegramNotifier::from_config(
        &config.notifier,
        client.clone(),
        config.http.timeout(),
    ) {
        Some(notifier) => Arc::new(notifier),
        None => {
            tracing::info!("Telegram notifier not configured, echoing order lines to the log");
            Arc::new(LogNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn test_fatal_classification() {
        assert!(ProviderError::InvalidCredential("Invalid API key".into()).is_fatal());
        assert!(ProviderError::NotConfigured(ProviderId::Socproof).is_fatal());
        assert!(ProviderError::MissingServiceId.is_fatal());
        assert!(!ProviderError::HttpStatus(502).is_fatal());
        assert!(!ProviderError::Timeout(Duration::from_secs(5)).is_fatal());
        assert!(!ProviderError::Rejected("Not enough funds on balance".into()).is_fatal());
        assert!(!ProviderError::AttemptsExhausted {
            attempts: 2,
            message: "boom".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_registry_only_holds_configured_providers() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "socproof".to_string(),
            ProviderConfig {
                token: Some("secret".to_string()),
                endpoint: None,
            },
        );
        config.providers.insert(
            "fxsmmsoc".to_string(),
            ProviderConfig {
                token: Some("${FXSMMSOC_TOKEN}".to_string()),
                endpoint: None,
            },
        );

        let client = build_http_client(Duration::from_secs(5)).unwrap();
        let registry = ProviderRegistry::from_config(&config, &client);

        assert!(registry.is_registered(ProviderId::Dummy));
        assert!(registry.is_registered(ProviderId::Socproof));
        assert!(!registry.is_registered(ProviderId::Fxsmmsoc));
        assert!(matches!(
            registry.get(ProviderId::Prosmmstore).err(),
            Some(ProviderError::NotConfigured(ProviderId::Prosmmstore))
        ));
    }
}
