use crate::config::AppConfig;
use crate::core::retry::RetryPolicy;
use crate::domain::model::{OrderRequest, ProviderId};
use crate::domain::ports::Provider;
use crate::providers::{ProviderError, ProviderResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub fn default_endpoint(id: ProviderId) -> Option<&'static str> {
    match id {
        ProviderId::Dummy => None,
        ProviderId::Socproof => Some("https://partner.soc-proof.su/api/v2"),
        ProviderId::Justanotherpanel => Some("https://justanotherpanel.com/api/v2"),
        ProviderId::Prosmmstore => Some("https://prosmm-store.com/api/v2"),
        ProviderId::Fxsmmsoc => Some("https://fxsmm.socpanel.com/api/v2"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    #[serde(default)]
    pub charge: Option<Decimal>,
    #[serde(default)]
    pub start_count: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub remains: Option<serde_json::Value>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddOrderReply {
    #[serde(default)]
    order: Option<serde_json::Value>,
}

/// Client for the panel API v2 protocol: form-encoded POSTs carrying `key`
/// and `action`, JSON replies with an `error` field on failure.
#[derive(Debug, Clone)]
pub struct PanelClient {
    provider: ProviderId,
    http: Client,
    endpoint: String,
    token: String,
    timeout: Duration,
}

impl PanelClient {
    pub fn new(
        provider: ProviderId,
        http: Client,
        endpoint: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            http,
            endpoint: endpoint.into(),
            token: token.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig, provider: ProviderId, http: Client) -> ProviderResult<Self> {
        let token = config
            .provider_token(provider)
            .ok_or(ProviderError::NotConfigured(provider))?;
        let endpoint = config
            .provider_endpoint(provider)
            .ok_or(ProviderError::NotConfigured(provider))?;
        Ok(Self::new(provider, http, endpoint, token, config.http.timeout()))
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn invoke<R: DeserializeOwned>(&self, params: &[(&str, String)]) -> ProviderResult<R> {
        let mut form: Vec<(&str, &str)> = vec![("key", self.token.as_str())];
        form.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .http
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::InvalidCredential(format!(
                "{} answered HTTP {}",
                self.provider, status
            )));
        }
        if !status.is_success() {
            tracing::error!("{} API error: HTTP {}", self.provider, status);
            return Err(ProviderError::HttpStatus(status.as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        if let Some(error) = body.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            tracing::error!("{} API error: {}", self.provider, message);
            if message.to_lowercase().contains("invalid api key") {
                return Err(ProviderError::InvalidCredential(message));
            }
            return Err(ProviderError::Rejected(message));
        }

        serde_json::from_value(body).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    /// Single `add` call, no retry.
    pub async fn add_order(
        &self,
        link: &str,
        service_id: &str,
        quantity: u64,
    ) -> ProviderResult<Option<String>> {
        let reply: AddOrderReply = self
            .invoke(&[
                ("action", "add".to_string()),
                ("service", service_id.to_string()),
                ("quantity", quantity.to_string()),
                ("link", link.to_string()),
            ])
            .await?;

        let order_id = match reply.order {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Ok(order_id.filter(|id| !id.trim().is_empty()))
    }

    pub async fn status(&self, order_id: &str) -> ProviderResult<OrderStatus> {
        self.invoke(&[
            ("action", "status".to_string()),
            ("order", order_id.to_string()),
        ])
        .await
    }

    /// Status of several orders keyed by order id; unknown ids carry an
    /// `error` object instead of a status.
    pub async fn multi_status(
        &self,
        order_ids: &[String],
    ) -> ProviderResult<HashMap<String, serde_json::Value>> {
        self.invoke(&[
            ("action", "status".to_string()),
            ("orders", order_ids.join(",")),
        ])
        .await
    }

    pub async fn services(&self) -> ProviderResult<serde_json::Value> {
        self.invoke(&[("action", "services".to_string())]).await
    }

    pub async fn balance(&self) -> ProviderResult<Balance> {
        self.invoke(&[("action", "balance".to_string())]).await
    }
}

pub struct PanelProvider {
    client: PanelClient,
    retry: RetryPolicy,
}

impl PanelProvider {
    pub fn new(client: PanelClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &PanelClient {
        &self.client
    }
}

#[async_trait]
impl Provider for PanelProvider {
    fn id(&self) -> ProviderId {
        self.client.provider()
    }

    async fn make_order(&self, request: &OrderRequest) -> ProviderResult<Option<String>> {
        let service_id = request
            .service_id
            .as_deref()
            .ok_or(ProviderError::MissingServiceId)?;
        let client = &self.client;
        let link = request.link.as_str();
        let quantity = request.quantity;

        tracing::info!(
            "Placing {} order: service={} quantity={} link={}",
            client.provider(),
            service_id,
            quantity,
            link
        );
        let order_id = self
            .retry
            .run(move || client.add_order(link, service_id, quantity))
            .await?;

        if order_id.is_none() {
            tracing::error!("{} accepted the order but returned no order id", client.provider());
        }
        Ok(order_id)
    }
}
