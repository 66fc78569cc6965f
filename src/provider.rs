use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{config::ProviderId, errors::ProviderError};

/// Result produced by the provider that won a race.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult<T> {
    /// Provider that produced `payload`.
    pub source: ProviderId,
    pub payload: T,
}

/// An independent upstream able to answer a lookup query.
///
/// Implementations must watch `cancel` at every point where they wait on
/// I/O and return promptly once it fires, releasing whatever connection or
/// handle they hold. The dispatcher also drops the lookup future when the
/// race resolves, so an implementation that only awaits cancel-safe I/O
/// gets this for free.
#[async_trait]
pub trait Provider: Send + Sync {
    type Output: Send + 'static;

    fn id(&self) -> ProviderId;

    async fn lookup(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Output, ProviderError>;
}
