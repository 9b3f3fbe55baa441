use async_trait::async_trait;
use perk_shared::models::{
    ApplyCounts, CustomerType, EligibilityDelta, EligibilityRecord, OfferDescriptor, OfferKind,
    OfferPayload, Outlet,
};

use crate::errors::{CacheError, StoreError};

/// Optional filters for the read path's eligibility query
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub outlet_id: Option<String>,
    pub offer_type: Option<OfferKind>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub skip: i64,
    pub take: i64,
}

/// Typed access to offer, segmentation, outlet and eligibility data.
/// Injected everywhere a component touches the store so tests can swap in
/// an in-memory double.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Kind-polymorphic descriptor lookup; None when the offer does not exist.
    async fn get_offer_descriptor(
        &self,
        offer_id: &str,
        kind: OfferKind,
    ) -> Result<Option<OfferDescriptor>, StoreError>;

    async fn list_active_outlets(&self, merchant_id: &str) -> Result<Vec<Outlet>, StoreError>;

    /// Customer-type rows for a merchant; `types: None` means all of them.
    async fn list_customer_types(
        &self,
        merchant_id: &str,
        types: Option<&[String]>,
    ) -> Result<Vec<CustomerType>, StoreError>;

    /// The actual materialized set for one offer, diffed against desired state.
    async fn list_offer_records(
        &self,
        offer_id: &str,
        kind: OfferKind,
    ) -> Result<Vec<EligibilityRecord>, StoreError>;

    /// Applies deletes, updates and inserts as one atomic unit.
    /// Duplicate-key collisions on insert are skipped, not errors.
    async fn apply_eligibility_delta(
        &self,
        delta: &EligibilityDelta,
    ) -> Result<ApplyCounts, StoreError>;

    /// Currently-valid rows for a user (valid_from <= now <= valid_until),
    /// newest first, plus the unpaged total.
    async fn list_user_records(
        &self,
        user_id: &str,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<(Vec<EligibilityRecord>, i64), StoreError>;

    /// Batched payload fetch, one call per offer kind.
    async fn get_offers_by_ids(
        &self,
        ids: &[String],
        kind: OfferKind,
    ) -> Result<Vec<OfferPayload>, StoreError>;

    /// Merchants the user currently holds a customer type at; part of the
    /// read-path cache key so stale membership never leaks across merchants.
    async fn list_user_merchants(&self, user_id: &str) -> Result<Vec<String>, StoreError>;
}

/// Key/value cache with TTL and pattern-scoped bulk deletion.
/// Never authoritative; every entry is reconstructible from the store.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), CacheError>;

    /// Deletes every key matching a glob pattern, returning the count removed.
    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}
