use crate::domain::model::{OrderRequest, ProviderId};
use crate::domain::ports::Provider;
use crate::providers::ProviderResult;
use async_trait::async_trait;

/// Stand-in for services nobody has mapped yet. Accepts every order and places
/// nothing, so the line stays `created` for manual handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyProvider;

#[async_trait]
impl Provider for DummyProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Dummy
    }

    async fn make_order(&self, request: &OrderRequest) -> ProviderResult<Option<String>> {
        tracing::info!(
            "Dummy provider: skipping order for {} (quantity {})",
            request.link,
            request.quantity
        );
        Ok(None)
    }
}
