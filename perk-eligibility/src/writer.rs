use std::sync::Arc;

use perk_core::{CacheGateway, StoreGateway, SyncError};
use perk_shared::models::{ApplyCounts, EligibilityDelta};
use tracing::{debug, info};

/// Applies a diff atomically through the store gateway, then invalidates
/// every cached read-path response scoped to the offer's merchant.
/// Invalidation runs strictly AFTER commit so a concurrent reader can never
/// repopulate the cache from pre-commit state and keep it.
pub struct TransactionalWriter {
    store: Arc<dyn StoreGateway>,
    cache: Arc<dyn CacheGateway>,
}

impl TransactionalWriter {
    pub fn new(store: Arc<dyn StoreGateway>, cache: Arc<dyn CacheGateway>) -> Self {
        Self { store, cache }
    }

    pub async fn apply(
        &self,
        merchant_id: &str,
        delta: &EligibilityDelta,
    ) -> Result<ApplyCounts, SyncError> {
        let counts = if delta.is_empty() {
            debug!("empty delta for merchant {}, store untouched", merchant_id);
            ApplyCounts::default()
        } else {
            self.store.apply_eligibility_delta(delta).await?
        };

        // Invalidation runs even when the delta is empty: a redelivered job
        // whose previous attempt committed but failed to invalidate arrives
        // with an empty diff and must still evict the stale entries.
        let removed = self
            .cache
            .invalidate_pattern(&merchant_scope_pattern(merchant_id))
            .await?;
        info!(
            "applied eligibility delta for merchant {}: created={} updated={} deleted={}, {} cache keys invalidated",
            merchant_id, counts.created, counts.updated, counts.deleted, removed
        );

        Ok(counts)
    }
}

/// Glob matching every cached read-path response whose merchant set contains
/// this merchant. Keys embed the set as `:m:+a+b+:`, so the `+` delimiters
/// keep `merchant-001` from matching `merchant-0011`.
pub fn merchant_scope_pattern(merchant_id: &str) -> String {
    format!("elig:*:m:*+{}+*", merchant_id)
}
