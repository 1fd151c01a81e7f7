use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fulfillment backends the relay knows how to dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Dummy,
    Socproof,
    Justanotherpanel,
    Prosmmstore,
    Fxsmmsoc,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::Dummy,
        ProviderId::Socproof,
        ProviderId::Justanotherpanel,
        ProviderId::Prosmmstore,
        ProviderId::Fxsmmsoc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Dummy => "dummy",
            ProviderId::Socproof => "socproof",
            ProviderId::Justanotherpanel => "justanotherpanel",
            ProviderId::Prosmmstore => "prosmmstore",
            ProviderId::Fxsmmsoc => "fxsmmsoc",
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, ProviderId::Dummy)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for ProviderId {
    type Err = UnknownProvider;

    /// Exact match on the catalog spelling; the spreadsheet uses lowercase ids.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// One order line's extracted facts. Built once by the parser, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLine {
    /// Raw description the line was parsed from.
    pub name: String,
    pub service_name: String,
    pub price_per_unit: Decimal,
    pub per_unit: Decimal,
    pub target_url: String,
    pub units_amount: Decimal,
    pub quantity: Decimal,
    pub paid_amount: Decimal,
    pub is_package: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAssessment {
    pub calculated_price: Decimal,
    pub is_payed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    /// Parsed, payment confirmed, not dispatched yet.
    Created,
    /// Terminal state set by downstream reviewers; never produced here.
    Rejected,
    Fulfilled,
    NotPayed,
    Failed,
}

impl LineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineState::Created => "created",
            LineState::Rejected => "rejected",
            LineState::Fulfilled => "fulfilled",
            LineState::NotPayed => "not_payed",
            LineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LineState::Created)
    }

    pub fn can_transition_to(&self, next: LineState) -> bool {
        matches!(
            (self, next),
            (LineState::Created, LineState::Fulfilled) | (LineState::Created, LineState::Failed)
        )
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the service resolution index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIndexEntry {
    pub service_name: String,
    pub service_id: Option<String>,
    pub provider_id: ProviderId,
}

impl ServiceIndexEntry {
    pub fn fallback(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            service_id: None,
            provider_id: ProviderId::Dummy,
        }
    }
}

/// What a provider needs to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    pub link: String,
    pub service_id: Option<String>,
    pub quantity: u64,
}

/// Everything known about a line at dispatch time, handed to the notifier.
#[derive(Debug, Clone)]
pub struct LineDetails<'a> {
    pub entry_id: &'a str,
    pub line: &'a ParsedLine,
    pub assessment: PaymentAssessment,
    pub entry: &'a ServiceIndexEntry,
    pub payment_system: Option<&'a str>,
}

/// Terminal result for one parsed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOutcome {
    pub entry_id: String,
    pub service_name: String,
    pub provider_id: ProviderId,
    pub service_id: Option<String>,
    pub calculated_price: Decimal,
    pub is_payed: bool,
    pub state: LineState,
    pub provider_order_id: Option<String>,
    pub error_hint: Option<String>,
}

/// A product whose description matched neither grammar variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnparsedLine {
    pub entry_id: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: String,
    pub payment_system: Option<String>,
    pub created_at: DateTime<Utc>,
    pub total: usize,
    pub lines: Vec<LineOutcome>,
    pub unparsed: Vec<UnparsedLine>,
}

impl OrderReport {
    pub fn count_in(&self, state: LineState) -> usize {
        self.lines.iter().filter(|l| l.state == state).count()
    }
}

/// Storefront webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub payment: Option<Payment>,
    /// Present only on the storefront's connectivity ping.
    #[serde(default)]
    pub test: Option<serde_json::Value>,
}

impl WebhookPayload {
    pub fn is_test(&self) -> bool {
        self.test.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub orderid: String,
    #[serde(default)]
    pub sys: Option<String>,
    #[serde(default)]
    pub systranid: Option<String>,
    #[serde(default)]
    pub products: Vec<ProductLine>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductLine {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
}
