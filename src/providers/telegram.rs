use crate::config::NotifierConfig;
use crate::domain::model::LineDetails;
use crate::domain::ports::Notifier;
use crate::providers::{ProviderError, ProviderResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Chat message for one order line.
pub fn describe(details: &LineDetails<'_>) -> String {
    let line = details.line;
    let entry = details.entry;
    let paid_mark = if details.assessment.is_payed { "✅" } else { "❌" };

    let mut text = format!("<b>Заказ {}</b>\n", escape_html(details.entry_id));
    text.push_str(&format!("Услуга: {}\n", escape_html(&line.service_name)));
    text.push_str(&format!("Ссылка: {}\n", escape_html(&line.target_url)));
    text.push_str(&format!(
        "Количество: {} x {}{}\n",
        line.units_amount,
        line.quantity,
        if line.is_package { " (пакет)" } else { "" }
    ));
    text.push_str(&format!(
        "Оплачено: {} / расчёт {} {}\n",
        line.paid_amount, details.assessment.calculated_price, paid_mark
    ));
    if let Some(system) = details.payment_system {
        text.push_str(&format!("Платёжная система: {}\n", escape_html(system)));
    }
    text.push_str(&format!(
        "Поставщик: {} (id услуги: {})\n",
        entry.provider_id,
        entry.service_id.as_deref().unwrap_or("-")
    ));
    if !line.name.is_empty() {
        text.push_str(&format!("<i>{}</i>\n", escape_html(&line.name)));
    }
    text.push_str(&hashtags(details).join(" "));
    text
}

fn hashtags(details: &LineDetails<'_>) -> Vec<String> {
    let mut tags = vec![format!("#{}", details.entry.provider_id)];
    tags.push(if details.assessment.is_payed {
        "#payed".to_string()
    } else {
        "#not_payed".to_string()
    });
    if details.line.is_package {
        tags.push("#package".to_string());
    }
    tags
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct BotReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Posts each line to a Telegram chat through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: Client,
    api_base: String,
    token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramNotifier {
    /// `timeout` must match the one `http` was built with; it is only used to
    /// report timeouts.
    pub fn new(
        http: Client,
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            timeout,
        }
    }

    /// `None` unless both the bot token and the chat id are set.
    pub fn from_config(config: &NotifierConfig, http: Client, timeout: Duration) -> Option<Self> {
        let token = config.token()?;
        let chat_id = config.chat_id()?;
        let api_base = config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
        Some(Self::new(http, api_base, token, chat_id, timeout))
    }

    pub async fn send_text(&self, text: &str) -> ProviderResult<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let reply: BotReply = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if !reply.ok {
            let description = reply
                .description
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(ProviderError::Rejected(description));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, details: &LineDetails<'_>) -> ProviderResult<()> {
        self.send_text(&describe(details)).await
    }
}

/// Writes lines to the log when no chat is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, details: &LineDetails<'_>) -> ProviderResult<()> {
        tracing::info!(
            entry_id = details.entry_id,
            service = %details.line.service_name,
            provider = %details.entry.provider_id,
            calculated_price = %details.assessment.calculated_price,
            is_payed = details.assessment.is_payed,
            "Order line received"
        );
        Ok(())
    }
}
