#[cfg(feature = "cli")]
pub mod cli;

use crate::core::retry::RetryPolicy;
use crate::domain::model::ProviderId;
use crate::providers::panel::default_endpoint;
use crate::utils::error::{RelayError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_url, Validate,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

static ENV_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

/// Blank values and `${VAR}` placeholders left by a missing variable mean
/// "not configured".
fn configured(value: Option<&String>) -> Option<&str> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && !ENV_PLACEHOLDER_RE.is_match(v))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// Keyed by provider id (`socproof`, `fxsmmsoc`, ...).
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    crate::core::retry::DEFAULT_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    crate::core::retry::DEFAULT_DELAY.as_millis() as u64
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    5
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub telegram_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl NotifierConfig {
    pub fn token(&self) -> Option<&str> {
        configured(self.telegram_token.as_ref())
    }

    pub fn chat_id(&self) -> Option<&str> {
        configured(self.chat_id.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(RelayError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);

        toml::from_str(&processed).map_err(|e| RelayError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the variable's value; unset variables are left
    /// in place and later read as "not configured".
    fn substitute_env_vars(content: &str) -> String {
        ENV_PLACEHOLDER_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// Builds the configuration from the process environment alone.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(raw) = lookup("RELAY_RETRY_ATTEMPTS") {
            config.retry.attempts = parse_env_number("RELAY_RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("RELAY_RETRY_DELAY_MS") {
            config.retry.delay_ms = parse_env_number("RELAY_RETRY_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("RELAY_HTTP_TIMEOUT_SECONDS") {
            config.http.timeout_seconds = parse_env_number("RELAY_HTTP_TIMEOUT_SECONDS", &raw)?;
        }

        config.notifier.telegram_token = lookup("TELEGRAM_TOKEN");
        config.notifier.chat_id = lookup("TELEGRAM_CHAT_ID");

        for id in ProviderId::ALL.into_iter().filter(|id| !id.is_dummy()) {
            let var = format!("{}_TOKEN", id.as_str().to_uppercase());
            if let Some(token) = lookup(&var) {
                config.providers.insert(
                    id.as_str().to_string(),
                    ProviderConfig {
                        token: Some(token),
                        endpoint: None,
                    },
                );
            }
        }

        Ok(config)
    }

    pub fn provider_token(&self, id: ProviderId) -> Option<&str> {
        configured(self.providers.get(id.as_str())?.token.as_ref())
    }

    /// Configured override, else the provider's public endpoint.
    pub fn provider_endpoint(&self, id: ProviderId) -> Option<String> {
        self.providers
            .get(id.as_str())
            .and_then(|p| configured(p.endpoint.as_ref()))
            .map(str::to_string)
            .or_else(|| default_endpoint(id).map(str::to_string))
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_range("retry.attempts", self.retry.attempts, 1, 10)?;
        validate_range("retry.delay_ms", self.retry.delay_ms, 0, 60_000)?;
        validate_positive_number("http.timeout_seconds", self.http.timeout_seconds, 1)?;

        if let Some(base) = configured(self.notifier.api_base.as_ref()) {
            validate_url("notifier.api_base", base)?;
        }
        if self.notifier.token().is_some() {
            validate_non_empty_string(
                "notifier.chat_id",
                self.notifier.chat_id().unwrap_or_default(),
            )?;
        }

        for (name, provider) in &self.providers {
            let id = name
                .parse::<ProviderId>()
                .map_err(|e| RelayError::InvalidConfigValueError {
                    field: "providers".to_string(),
                    value: name.clone(),
                    reason: e.to_string(),
                })?;
            if id.is_dummy() {
                return Err(RelayError::InvalidConfigValueError {
                    field: "providers".to_string(),
                    value: name.clone(),
                    reason: "the dummy provider takes no configuration".to_string(),
                });
            }
            if let Some(endpoint) = configured(provider.endpoint.as_ref()) {
                validate_url(&format!("providers.{}.endpoint", name), endpoint)?;
            }
        }

        Ok(())
    }
}

fn parse_env_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::InvalidConfigValueError {
            field: name.to_string(),
            value: raw.to_string(),
            reason: "expected a non-negative integer".to_string(),
        })
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.retry.attempts, 2);
        assert_eq!(config.retry.delay_ms, 200);
        assert_eq!(config.http.timeout(), Duration::from_secs(5));
        assert!(config.notifier.token().is_none());
        assert!(config.provider_token(ProviderId::Socproof).is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
[retry]
attempts = 3
delay_ms = 50

[http]
timeout_seconds = 10

[notifier]
telegram_token = "123:abc"
chat_id = "-100500"

[providers.socproof]
token = "soc-secret"

[providers.fxsmmsoc]
token = "fx-secret"
endpoint = "http://127.0.0.1:9000/api/v2"
"#;
        let config = AppConfig::from_toml_str(content).unwrap();
        assert_eq!(config.retry.policy().attempts(), 3);
        assert_eq!(config.retry.policy().delay(), Duration::from_millis(50));
        assert_eq!(config.notifier.token(), Some("123:abc"));
        assert_eq!(config.provider_token(ProviderId::Socproof), Some("soc-secret"));
        assert_eq!(
            config.provider_endpoint(ProviderId::Socproof).as_deref(),
            Some("https://partner.soc-proof.su/api/v2")
        );
        assert_eq!(
            config.provider_endpoint(ProviderId::Fxsmmsoc).as_deref(),
            Some("http://127.0.0.1:9000/api/v2")
        );
        assert_eq!(config.provider_endpoint(ProviderId::Dummy), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ORDER_RELAY_TEST_SOC_TOKEN", "from-env");

        let content = r#"
[providers.socproof]
token = "${ORDER_RELAY_TEST_SOC_TOKEN}"

[providers.prosmmstore]
token = "${ORDER_RELAY_TEST_UNSET_TOKEN}"
"#;
        let config = AppConfig::from_toml_str(content).unwrap();
        assert_eq!(config.provider_token(ProviderId::Socproof), Some("from-env"));
        assert_eq!(config.provider_token(ProviderId::Prosmmstore), None);

        std::env::remove_var("ORDER_RELAY_TEST_SOC_TOKEN");
    }

    #[test]
    fn test_from_lookup_reads_original_variable_names() {
        let vars: HashMap<&str, &str> = [
            ("TELEGRAM_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "42"),
            ("JUSTANOTHERPANEL_TOKEN", "jap"),
            ("FXSMMSOC_TOKEN", "  "),
            ("RELAY_RETRY_ATTEMPTS", "4"),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.notifier.chat_id(), Some("42"));
        assert_eq!(config.provider_token(ProviderId::Justanotherpanel), Some("jap"));
        assert_eq!(config.provider_token(ProviderId::Fxsmmsoc), None);
        assert_eq!(config.retry.attempts, 4);
        assert_eq!(config.retry.delay_ms, 200);
    }

    #[test]
    fn test_bad_env_number_is_rejected() {
        let result = AppConfig::from_lookup(|name| {
            (name == "RELAY_HTTP_TIMEOUT_SECONDS").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(RelayError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        let unknown = AppConfig::from_toml_str("[providers.somepanel]\ntoken = \"x\"\n").unwrap();
        assert!(unknown.validate().is_err());

        let bad_url =
            AppConfig::from_toml_str("[providers.socproof]\nendpoint = \"not-a-url\"\n").unwrap();
        assert!(bad_url.validate().is_err());

        let zero_attempts = AppConfig::from_toml_str("[retry]\nattempts = 0\n").unwrap();
        assert!(zero_attempts.validate().is_err());

        let no_chat =
            AppConfig::from_toml_str("[notifier]\ntelegram_token = \"123:abc\"\n").unwrap();
        assert!(no_chat.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[http]\ntimeout_seconds = 2\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.http.timeout_seconds, 2);
    }
}
