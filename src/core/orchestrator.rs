use crate::core::index::{RebuildReport, ServiceIndex, SharedServiceIndex};
use crate::core::parser::parse_product;
use crate::core::payment::{classify, dispatch_quantity};
use crate::domain::model::{
    LineDetails, LineOutcome, LineState, OrderReport, OrderRequest, ParsedLine, Payment,
    PaymentAssessment, ServiceIndexEntry, UnparsedLine, WebhookPayload,
};
use crate::domain::ports::{Notifier, OrderStore};
use crate::providers::{ProviderError, ProviderRegistry, ProviderResult};
use crate::utils::error::{RelayError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Drives order lines from parsed text to a terminal state.
///
/// Lines are handled one after another in the order given. A failure is
/// recorded on its own line and never stops the rest of the order.
pub struct OrderProcessor {
    index: SharedServiceIndex,
    providers: ProviderRegistry,
    notifier: Arc<dyn Notifier>,
}

fn advance(entry_id: &str, state: &mut LineState, next: LineState) {
    if state.can_transition_to(next) {
        *state = next;
    } else {
        tracing::warn!("{}: ignoring transition {} -> {}", entry_id, state, next);
    }
}

impl OrderProcessor {
    pub fn new(
        index: SharedServiceIndex,
        providers: ProviderRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            index,
            providers,
            notifier,
        }
    }

    pub fn index(&self) -> &SharedServiceIndex {
        &self.index
    }

    /// Loads the persisted index into memory.
    pub async fn load_index<S: OrderStore>(&self, store: &S) -> Result<usize> {
        let entries = store.load_service_index().await?;
        let index = ServiceIndex::from_entries(entries);
        let count = index.len();
        self.index.replace(index);
        tracing::info!("Loaded service index with {} entries", count);
        Ok(count)
    }

    /// Rebuilds the index from a CSV of `(service_name, service_id, provider_id)`
    /// rows. The new index is persisted before it replaces the current one, so
    /// a failed write leaves the old index in place.
    pub async fn import_index<S: OrderStore>(&self, store: &S, path: &str) -> Result<RebuildReport> {
        let rows = store.load_service_rows(path).await?;
        let (index, report) = ServiceIndex::rebuild(&rows);

        for rejection in &report.rejected {
            tracing::debug!("Service row skipped: {:?}", rejection);
        }
        if report.invalid() > 0 {
            tracing::warn!("{} invalid service rows skipped", report.invalid());
        }

        store.save_service_index(&index.entries()).await?;
        self.index.replace(index);

        tracing::info!(
            "Service index rebuilt: {} accepted, {} duplicates, {} invalid",
            report.accepted,
            report.duplicates(),
            report.invalid()
        );
        Ok(report)
    }

    /// Webhook entry point. Returns `None` for the storefront's test ping.
    pub async fn process_webhook<S: OrderStore>(
        &self,
        store: &S,
        payload: &WebhookPayload,
    ) -> Result<Option<OrderReport>> {
        if payload.is_test() {
            tracing::info!("Test webhook received, nothing to do");
            return Ok(None);
        }
        let payment = payload.payment.as_ref().ok_or_else(|| RelayError::PayloadError {
            message: "payload has neither 'payment' nor 'test'".to_string(),
        })?;
        if payment.orderid.trim().is_empty() {
            return Err(RelayError::PayloadError {
                message: "payment.orderid is empty".to_string(),
            });
        }
        // Claimed before any provider call; a claim is never released.
        if !store.claim_order(&payment.orderid).await? {
            return Err(RelayError::DuplicateOrder {
                order_id: payment.orderid.clone(),
            });
        }

        let report = self.process_payment(payment).await;
        store.save_report(&report).await?;
        Ok(Some(report))
    }

    /// Parses and processes every product of one payment.
    pub async fn process_payment(&self, payment: &Payment) -> OrderReport {
        let mut lines = Vec::with_capacity(payment.products.len());
        let mut unparsed = Vec::new();

        tracing::info!(
            "Processing order {} with {} products",
            payment.orderid,
            payment.products.len()
        );

        for (n, product) in payment.products.iter().enumerate() {
            let entry_id = format!("{}-{}", payment.orderid, n);
            match parse_product(product) {
                Ok(line) => {
                    let outcome = self
                        .process_line(&entry_id, &line, payment.sys.as_deref())
                        .await;
                    lines.push(outcome);
                }
                Err(e) => {
                    tracing::warn!("{}: cannot parse '{}': {}", entry_id, product.name, e);
                    unparsed.push(UnparsedLine {
                        entry_id,
                        name: product.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = OrderReport {
            order_id: payment.orderid.clone(),
            payment_system: payment.sys.clone(),
            created_at: Utc::now(),
            total: payment.products.len(),
            lines,
            unparsed,
        };
        log_summary(&report);
        report
    }

    /// Processes lines that were parsed elsewhere (e.g. a raw order string).
    pub async fn process_lines(
        &self,
        order_id: &str,
        payment_system: Option<&str>,
        parsed: &[ParsedLine],
    ) -> OrderReport {
        let mut lines = Vec::with_capacity(parsed.len());
        for (n, line) in parsed.iter().enumerate() {
            let entry_id = format!("{}-{}", order_id, n);
            lines.push(self.process_line(&entry_id, line, payment_system).await);
        }

        let report = OrderReport {
            order_id: order_id.to_string(),
            payment_system: payment_system.map(str::to_string),
            created_at: Utc::now(),
            total: parsed.len(),
            lines,
            unparsed: Vec::new(),
        };
        log_summary(&report);
        report
    }

    pub async fn process_line(
        &self,
        entry_id: &str,
        line: &ParsedLine,
        payment_system: Option<&str>,
    ) -> LineOutcome {
        let entry = self.index.resolve(&line.service_name);
        let assessment = match PaymentAssessment::evaluate(line) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!("{}: cannot price line: {}", entry_id, e);
                let mut state = LineState::Created;
                advance(entry_id, &mut state, LineState::Failed);
                return LineOutcome {
                    entry_id: entry_id.to_string(),
                    service_name: line.service_name.clone(),
                    provider_id: entry.provider_id,
                    service_id: entry.service_id,
                    calculated_price: Decimal::ZERO,
                    is_payed: false,
                    state,
                    provider_order_id: None,
                    error_hint: Some(e.to_string()),
                };
            }
        };
        let mut state = classify(line, &assessment);

        let details = LineDetails {
            entry_id,
            line,
            assessment,
            entry: &entry,
            payment_system,
        };
        if let Err(e) = self.notifier.notify(&details).await {
            tracing::warn!("{}: notifier failed: {}", entry_id, e);
        }

        let mut provider_order_id = None;
        let mut error_hint = None;

        if assessment.is_payed {
            match self.dispatch(line, &entry).await {
                Ok(Some(order_id)) => {
                    tracing::info!(
                        "{}: {} order {} placed",
                        entry_id,
                        entry.provider_id,
                        order_id
                    );
                    provider_order_id = Some(order_id);
                    advance(entry_id, &mut state, LineState::Fulfilled);
                }
                Ok(None) => {
                    tracing::info!(
                        "{}: {} returned no order id, line left {}",
                        entry_id,
                        entry.provider_id,
                        state
                    );
                }
                Err(e) => {
                    if e.is_credential_failure() {
                        tracing::error!(
                            entry_id,
                            provider = %entry.provider_id,
                            "Provider rejected our credential, fix the token: {}",
                            e
                        );
                    } else if e.is_fatal() {
                        tracing::error!("{}: {} cannot take orders: {}", entry_id, entry.provider_id, e);
                    } else {
                        tracing::warn!("{}: {} order failed: {}", entry_id, entry.provider_id, e);
                    }
                    error_hint = Some(e.to_string());
                    advance(entry_id, &mut state, LineState::Failed);
                }
            }
        } else {
            tracing::info!(
                "{}: paid {} of {}, not dispatching",
                entry_id,
                line.paid_amount,
                assessment.calculated_price
            );
        }

        LineOutcome {
            entry_id: entry_id.to_string(),
            service_name: line.service_name.clone(),
            provider_id: entry.provider_id,
            service_id: entry.service_id,
            calculated_price: assessment.calculated_price,
            is_payed: assessment.is_payed,
            state,
            provider_order_id,
            error_hint,
        }
    }

    async fn dispatch(
        &self,
        line: &ParsedLine,
        entry: &ServiceIndexEntry,
    ) -> ProviderResult<Option<String>> {
        let provider = self.providers.get(entry.provider_id)?;
        let request = OrderRequest {
            link: line.target_url.clone(),
            service_id: entry.service_id.clone(),
            quantity: dispatch_quantity(line)
                .map_err(|e| ProviderError::Rejected(e.to_string()))?,
        };
        if request.quantity == 0 {
            return Err(ProviderError::Rejected(
                "order volume rounds to zero".to_string(),
            ));
        }
        provider.make_order(&request).await
    }
}

fn log_summary(report: &OrderReport) {
    tracing::info!(
        "Order {} done: {} fulfilled, {} created, {} not payed, {} failed, {} unparsed",
        report.order_id,
        report.count_in(LineState::Fulfilled),
        report.count_in(LineState::Created),
        report.count_in(LineState::NotPayed),
        report.count_in(LineState::Failed),
        report.unparsed.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ProductLine, ProviderId};
    use crate::domain::ports::Provider;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    const VK_LIKES: &str = "Услуга ВК: Лайки Стандарт: 0.5 руб. / 1 шт   Ссылка: https://vk.com/wall-217057222_8  Количество: 95";
    const TG_PACKAGE: &str = "Услуга Telegram: Премиум 1000 подп: 720 руб. 0.72/шт вместо 0.8/шт   Ссылка: https://t.me/x  Количество: 1 пакет";

    struct ScriptedProvider {
        id: ProviderId,
        reply: fn() -> ProviderResult<Option<String>>,
        requests: Mutex<Vec<OrderRequest>>,
    }

    impl ScriptedProvider {
        fn new(id: ProviderId, reply: fn() -> ProviderResult<Option<String>>) -> Arc<Self> {
            Arc::new(Self {
                id,
                reply,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn make_order(&self, request: &OrderRequest) -> ProviderResult<Option<String>> {
            self.requests.lock().push(request.clone());
            (self.reply)()
        }
    }

    #[derive(Default)]
    struct FailingNotifier {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, details: &LineDetails<'_>) -> ProviderResult<()> {
            self.seen.lock().push(details.entry_id.to_string());
            Err(ProviderError::Transport("chat unreachable".into()))
        }
    }

    fn index() -> SharedServiceIndex {
        let row = |name: &str, id: &str, provider: &str| {
            vec![name.to_string(), id.to_string(), provider.to_string()]
        };
        let (index, _) = ServiceIndex::rebuild(vec![
            row("ВК: Лайки Стандарт", "101", "socproof"),
            row("Telegram: Премиум 1000 подп", "202", "fxsmmsoc"),
        ]);
        SharedServiceIndex::new(index)
    }

    fn product(name: &str, amount: rust_decimal::Decimal) -> ProductLine {
        ProductLine {
            name: name.to_string(),
            quantity: Some(dec!(1)),
            amount: Some(amount),
            price: Some(amount),
        }
    }

    fn payment(products: Vec<ProductLine>) -> Payment {
        Payment {
            orderid: "1624284557".to_string(),
            sys: Some("yakassa".to_string()),
            systranid: None,
            products,
            amount: None,
        }
    }

    #[tokio::test]
    async fn test_paid_line_is_fulfilled_and_notifier_failure_ignored() {
        let socproof = ScriptedProvider::new(ProviderId::Socproof, || Ok(Some("23501".into())));
        let mut providers = ProviderRegistry::new();
        providers.register(socproof.clone());
        let notifier = Arc::new(FailingNotifier::default());
        let processor = OrderProcessor::new(index(), providers, notifier.clone());

        let report = processor
            .process_payment(&payment(vec![product(VK_LIKES, dec!(48))]))
            .await;

        assert_eq!(report.total, 1);
        let line = &report.lines[0];
        assert_eq!(line.entry_id, "1624284557-0");
        assert_eq!(line.state, LineState::Fulfilled);
        assert_eq!(line.provider_order_id.as_deref(), Some("23501"));
        assert_eq!(line.calculated_price, dec!(47.5));
        assert_eq!(line.error_hint, None);

        let requests = socproof.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].service_id.as_deref(), Some("101"));
        assert_eq!(requests[0].quantity, 95);
        assert_eq!(notifier.seen.lock().as_slice(), ["1624284557-0"]);
    }

    #[tokio::test]
    async fn test_unpaid_line_is_notified_but_not_dispatched() {
        let socproof = ScriptedProvider::new(ProviderId::Socproof, || Ok(Some("1".into())));
        let mut providers = ProviderRegistry::new();
        providers.register(socproof.clone());
        let notifier = Arc::new(FailingNotifier::default());
        let processor = OrderProcessor::new(index(), providers, notifier.clone());

        let report = processor
            .process_payment(&payment(vec![product(VK_LIKES, dec!(10))]))
            .await;

        assert_eq!(report.lines[0].state, LineState::NotPayed);
        assert!(!report.lines[0].is_payed);
        assert!(socproof.requests.lock().is_empty());
        assert_eq!(notifier.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_stay_local_to_their_line() {
        let socproof = ScriptedProvider::new(ProviderId::Socproof, || {
            Err(ProviderError::InvalidCredential("Invalid API key".into()))
        });
        let fxsmmsoc = ScriptedProvider::new(ProviderId::Fxsmmsoc, || Ok(Some("777".into())));
        let mut providers = ProviderRegistry::new();
        providers.register(socproof);
        providers.register(fxsmmsoc.clone());
        let processor =
            OrderProcessor::new(index(), providers, Arc::new(FailingNotifier::default()));

        let report = processor
            .process_payment(&payment(vec![
                product(VK_LIKES, dec!(48)),
                product("not an order line", dec!(5)),
                product(TG_PACKAGE, dec!(720)),
            ]))
            .await;

        assert_eq!(report.total, 3);
        assert_eq!(report.lines.len(), 2);
        assert_eq!(report.lines[0].state, LineState::Failed);
        assert!(report.lines[0]
            .error_hint
            .as_deref()
            .unwrap()
            .contains("Invalid API key"));
        assert_eq!(report.lines[1].entry_id, "1624284557-2");
        assert_eq!(report.lines[1].state, LineState::Fulfilled);
        assert_eq!(fxsmmsoc.requests.lock()[0].quantity, 1000);

        assert_eq!(report.unparsed.len(), 1);
        assert_eq!(report.unparsed[0].entry_id, "1624284557-1");
    }

    #[tokio::test]
    async fn test_unregistered_provider_fails_line() {
        let processor = OrderProcessor::new(
            index(),
            ProviderRegistry::new(),
            Arc::new(FailingNotifier::default()),
        );

        let report = processor
            .process_payment(&payment(vec![product(VK_LIKES, dec!(48))]))
            .await;

        let line = &report.lines[0];
        assert_eq!(line.state, LineState::Failed);
        assert_eq!(line.provider_id, ProviderId::Socproof);
        assert!(line.error_hint.as_deref().unwrap().contains("socproof"));
    }

    #[tokio::test]
    async fn test_unknown_service_goes_to_dummy_and_stays_created() {
        let processor = OrderProcessor::new(
            SharedServiceIndex::default(),
            ProviderRegistry::new(),
            Arc::new(FailingNotifier::default()),
        );
        let line = crate::core::parser::parse_line(VK_LIKES, None, Some(dec!(48))).unwrap();

        let report = processor.process_lines("42", None, &[line]).await;

        let outcome = &report.lines[0];
        assert_eq!(outcome.entry_id, "42-0");
        assert_eq!(outcome.provider_id, ProviderId::Dummy);
        assert_eq!(outcome.state, LineState::Created);
        assert_eq!(outcome.provider_order_id, None);
        assert_eq!(outcome.error_hint, None);
    }

    #[tokio::test]
    async fn test_missing_order_id_keeps_line_created() {
        let socproof = ScriptedProvider::new(ProviderId::Socproof, || Ok(None));
        let mut providers = ProviderRegistry::new();
        providers.register(socproof);
        let processor =
            OrderProcessor::new(index(), providers, Arc::new(FailingNotifier::default()));

        let report = processor
            .process_payment(&payment(vec![product(VK_LIKES, dec!(48))]))
            .await;
        assert_eq!(report.lines[0].state, LineState::Created);
    }

    #[tokio::test]
    async fn test_out_of_range_line_does_not_stop_the_order() {
        let socproof = ScriptedProvider::new(ProviderId::Socproof, || Ok(Some("5".into())));
        let mut providers = ProviderRegistry::new();
        providers.register(socproof.clone());
        let processor =
            OrderProcessor::new(index(), providers, Arc::new(FailingNotifier::default()));
        let huge = "Услуга ВК: Лайки Стандарт: 0.5 руб. / 1 шт   Ссылка: https://vk.com/wall-1_1  Количество: 79228162514264337593543950335";

        let mut oversized = product(huge, dec!(10));
        oversized.quantity = Some(dec!(2));
        let report = processor
            .process_payment(&payment(vec![oversized, product(VK_LIKES, dec!(48))]))
            .await;

        assert_eq!(report.total, 2);
        assert_eq!(report.unparsed.len(), 1);
        assert_eq!(report.unparsed[0].entry_id, "1624284557-0");
        assert_eq!(report.lines.len(), 1);
        assert_eq!(report.lines[0].state, LineState::Fulfilled);
        assert_eq!(socproof.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unpriceable_line_fails_without_dispatch() {
        let socproof = ScriptedProvider::new(ProviderId::Socproof, || Ok(Some("5".into())));
        let mut providers = ProviderRegistry::new();
        providers.register(socproof.clone());
        let processor =
            OrderProcessor::new(index(), providers, Arc::new(FailingNotifier::default()));
        let mut line = crate::core::parser::parse_line(VK_LIKES, None, Some(dec!(48))).unwrap();
        line.units_amount = Decimal::MAX;
        line.quantity = dec!(3);

        let outcome = processor.process_line("7-0", &line, None).await;

        assert_eq!(outcome.state, LineState::Failed);
        assert!(!outcome.is_payed);
        assert!(outcome.error_hint.unwrap().contains("calculated_price"));
        assert!(socproof.requests.lock().is_empty());
    }
}
