use crate::domain::model::{
    LineDetails, OrderReport, OrderRequest, ProviderId, ServiceIndexEntry,
};
use crate::providers::ProviderResult;
use crate::utils::error::Result;
use async_trait::async_trait;

/// A fulfillment backend able to place orders.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Places one order. `Ok(None)` means the provider accepted the call but
    /// returned no order id.
    async fn make_order(&self, request: &OrderRequest) -> ProviderResult<Option<String>>;
}

/// Best-effort echo of order lines for humans. Failures never change line state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, details: &LineDetails<'_>) -> ProviderResult<()>;
}

/// Persistence collaborator: service rows in, order reports out.
pub trait OrderStore: Send + Sync {
    fn load_service_rows(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Vec<String>>>> + Send;

    fn save_service_index(
        &self,
        entries: &[ServiceIndexEntry],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn load_service_index(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ServiceIndexEntry>>> + Send;

    /// Marks `order_id` as taken. `Ok(false)` when the order was already
    /// claimed or reported; a claim is never released.
    fn claim_order(&self, order_id: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

    fn save_report(&self, report: &OrderReport)
        -> impl std::future::Future<Output = Result<()>> + Send;

    fn load_report(
        &self,
        order_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<OrderReport>>> + Send;
}
