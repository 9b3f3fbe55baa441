use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use perk_core::{CacheGateway, CacheTtl, PageRequest, RecordFilter, StoreGateway, SyncError};
use perk_shared::models::{OfferKind, OfferPayload};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 100;

/// Filters for "which offers is this user eligible for right now?"
#[derive(Debug, Clone)]
pub struct OfferQuery {
    pub user_id: String,
    pub outlet_id: Option<String>,
    pub offer_type: Option<OfferKind>,
    pub page: u32,
    pub limit: u32,
}

impl OfferQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            outlet_id: None,
            offer_type: None,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// An offer payload joined with the requesting user's own validity window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EligibleOffer {
    pub offer: OfferPayload,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferFeed {
    pub offers: Vec<EligibleOffer>,
    pub total: i64,
    pub has_more: bool,
    pub page: u32,
}

/// Cache-aside query surface over the materialized eligibility table.
/// Only ever reads eligibility rows and offer payloads; never touches the
/// raw segmentation tables the writer joins over.
pub struct ReadPath {
    store: Arc<dyn StoreGateway>,
    cache: Arc<dyn CacheGateway>,
    ttl: CacheTtl,
}

impl ReadPath {
    pub fn new(store: Arc<dyn StoreGateway>, cache: Arc<dyn CacheGateway>, ttl: CacheTtl) -> Self {
        Self { store, cache, ttl }
    }

    pub async fn query(&self, query: &OfferQuery) -> Result<OfferFeed, SyncError> {
        let page = query.page.max(1);
        let limit = query.limit.max(1);

        // The merchant set is part of the key: a response cached under a
        // stale merchant membership must not survive the user joining or
        // leaving a merchant.
        let mut merchants = self.store.list_user_merchants(&query.user_id).await?;
        merchants.sort();
        let key = cache_key(query, &merchants, page, limit);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<OfferFeed>(&bytes) {
                Ok(feed) => return Ok(feed),
                Err(e) => warn!("discarding undecodable cache entry {}: {}", key, e),
            },
            Ok(None) => {}
            Err(e) => warn!("cache read failed for {}, falling back to store: {}", key, e),
        }

        let filter = RecordFilter {
            outlet_id: query.outlet_id.clone(),
            offer_type: query.offer_type,
        };
        let request = PageRequest {
            skip: (page as i64 - 1) * limit as i64,
            take: limit as i64,
        };
        let (rows, total) = self
            .store
            .list_user_records(&query.user_id, &filter, request)
            .await?;
        let has_more = (page as i64) * (limit as i64) < total;

        if rows.is_empty() {
            // Short-lived empty entry: bounds repeated-miss cost for
            // permanently-ineligible users without long staleness.
            let feed = OfferFeed {
                offers: Vec::new(),
                total,
                has_more,
                page,
            };
            self.cache_put(&key, &feed, self.ttl.empty_secs).await;
            return Ok(feed);
        }

        // One payload fetch per offer kind instead of one per row.
        let mut ids_by_kind: HashMap<OfferKind, BTreeSet<String>> = HashMap::new();
        for row in &rows {
            ids_by_kind
                .entry(row.offer_type)
                .or_default()
                .insert(row.offer_id.clone());
        }
        let mut payloads: HashMap<(OfferKind, String), OfferPayload> = HashMap::new();
        for (kind, ids) in ids_by_kind {
            let ids: Vec<String> = ids.into_iter().collect();
            for payload in self.store.get_offers_by_ids(&ids, kind).await? {
                payloads.insert((kind, payload.id.clone()), payload);
            }
        }

        let offers = rows
            .iter()
            .filter_map(|row| {
                let payload = payloads.get(&(row.offer_type, row.offer_id.clone()));
                if payload.is_none() {
                    warn!(
                        "eligibility row {} references missing offer {} ({})",
                        row.id, row.offer_id, row.offer_type
                    );
                }
                payload.map(|p| EligibleOffer {
                    offer: p.clone(),
                    valid_from: row.valid_from,
                    valid_until: row.valid_until,
                })
            })
            .collect();

        let feed = OfferFeed {
            offers,
            total,
            has_more,
            page,
        };
        self.cache_put(&key, &feed, self.ttl.positive_secs).await;
        Ok(feed)
    }

    /// Cache population is best-effort: a write failure degrades the next
    /// read to a store round trip, it never fails this one.
    async fn cache_put(&self, key: &str, feed: &OfferFeed, ttl_seconds: u64) {
        match serde_json::to_vec(feed) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(key, &bytes, ttl_seconds).await {
                    warn!("cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => warn!("failed to encode feed for {}: {}", key, e),
        }
    }
}

/// Deterministic composite of every filter parameter plus the user's sorted
/// merchant set. The `+`-delimited merchant segment is what the writer's
/// invalidation pattern anchors on.
fn cache_key(query: &OfferQuery, sorted_merchants: &[String], page: u32, limit: u32) -> String {
    format!(
        "elig:u:{}:m:+{}+:o:{}:t:{}:p:{}:l:{}",
        query.user_id,
        sorted_merchants.join("+"),
        query.outlet_id.as_deref().unwrap_or("-"),
        query.offer_type.map(|k| k.as_str()).unwrap_or("-"),
        page,
        limit
    )
}
