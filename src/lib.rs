pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod providers;
pub mod utils;

pub use crate::adapters::LocalStorage;
pub use crate::config::AppConfig;
pub use crate::core::{OrderProcessor, RetryPolicy, ServiceIndex, SharedServiceIndex};
pub use crate::domain::model::{
    LineOutcome, LineState, OrderReport, ParsedLine, PaymentAssessment, ProviderId,
    ServiceIndexEntry, WebhookPayload,
};
pub use crate::providers::{ProviderError, ProviderRegistry};
pub use crate::utils::error::{RelayError, Result};
