//! In-memory gateway doubles for pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use perk_core::errors::{CacheError, StoreError};
use perk_core::gateway::{CacheGateway, PageRequest, RecordFilter, StoreGateway};
use perk_shared::models::{
    ApplyCounts, CustomerType, EligibilityDelta, EligibilityRecord, OfferDescriptor, OfferKind,
    OfferPayload, Outlet,
};

pub struct StoredOffer {
    pub descriptor: OfferDescriptor,
    pub payload: OfferPayload,
}

#[derive(Default)]
struct StoreData {
    offers: HashMap<(OfferKind, String), StoredOffer>,
    outlets: Vec<Outlet>,
    customer_types: Vec<CustomerType>,
    // (insertion seq, record) so the read path can order newest-first
    records: Vec<(u64, EligibilityRecord)>,
    seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    pub apply_calls: AtomicU64,
    pub list_user_calls: AtomicU64,
    fail_applies: AtomicU32,
    apply_delay_ms: AtomicU64,
    in_flight_offers: Mutex<HashSet<String>>,
    overlapping_applies: AtomicBool,
    peak_parallel_applies: AtomicU64,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_offer(
        &self,
        kind: OfferKind,
        offer_id: &str,
        merchant_id: &str,
        eligible: &[&str],
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) {
        let mut data = self.data.lock().unwrap();
        data.offers.insert(
            (kind, offer_id.to_string()),
            StoredOffer {
                descriptor: OfferDescriptor {
                    eligible_customer_types: eligible.iter().map(|s| s.to_string()).collect(),
                    start_date,
                    end_date,
                    is_active: true,
                    deleted_at: None,
                },
                payload: OfferPayload {
                    id: offer_id.to_string(),
                    offer_type: kind,
                    merchant_id: merchant_id.to_string(),
                    name: format!("{} offer", offer_id),
                    description: None,
                    start_date,
                    end_date,
                    metadata: serde_json::json!({}),
                },
            },
        );
    }

    pub fn set_offer_active(&self, kind: OfferKind, offer_id: &str, active: bool) {
        let mut data = self.data.lock().unwrap();
        let offer = data
            .offers
            .get_mut(&(kind, offer_id.to_string()))
            .expect("offer not seeded");
        offer.descriptor.is_active = active;
    }

    pub fn set_offer_end_date(&self, kind: OfferKind, offer_id: &str, end: DateTime<Utc>) {
        let mut data = self.data.lock().unwrap();
        let offer = data
            .offers
            .get_mut(&(kind, offer_id.to_string()))
            .expect("offer not seeded");
        offer.descriptor.end_date = Some(end);
        offer.payload.end_date = Some(end);
    }

    pub fn add_outlet(&self, outlet_id: &str, merchant_id: &str, active: bool) {
        self.data.lock().unwrap().outlets.push(Outlet {
            id: outlet_id.to_string(),
            merchant_id: merchant_id.to_string(),
            is_active: active,
        });
    }

    pub fn add_customer(&self, user_id: &str, merchant_id: &str, type_label: &str) {
        self.data.lock().unwrap().customer_types.push(CustomerType {
            user_id: user_id.to_string(),
            merchant_id: merchant_id.to_string(),
            type_label: type_label.to_string(),
        });
    }

    /// Makes the next `n` delta applies fail with a transient error.
    pub fn fail_next_applies(&self, n: u32) {
        self.fail_applies.store(n, Ordering::SeqCst);
    }

    /// Holds each delta apply open for `ms` so tests can observe which
    /// applies run concurrently.
    pub fn set_apply_delay_ms(&self, ms: u64) {
        self.apply_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// True if two applies touching the same offer ever overlapped.
    pub fn overlapping_applies(&self) -> bool {
        self.overlapping_applies.load(Ordering::SeqCst)
    }

    /// Highest number of offers observed mid-apply at the same time.
    pub fn peak_parallel_applies(&self) -> u64 {
        self.peak_parallel_applies.load(Ordering::SeqCst)
    }

    fn delta_offer_ids(&self, delta: &EligibilityDelta) -> HashSet<String> {
        let data = self.data.lock().unwrap();
        let mut ids: HashSet<String> =
            delta.to_create.iter().map(|r| r.offer_id.clone()).collect();
        for update in &delta.to_update {
            if let Some((_, r)) = data.records.iter().find(|(_, r)| r.id == update.id) {
                ids.insert(r.offer_id.clone());
            }
        }
        for deleted in &delta.to_delete {
            if let Some((_, r)) = data.records.iter().find(|(_, r)| r.id == *deleted) {
                ids.insert(r.offer_id.clone());
            }
        }
        ids
    }

    pub fn record_count(&self, offer_id: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(_, r)| r.offer_id == offer_id)
            .count()
    }

    pub fn record_pairs(&self, offer_id: &str) -> HashSet<(String, String)> {
        self.data
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(_, r)| r.offer_id == offer_id)
            .map(|(_, r)| (r.user_id.clone(), r.outlet_id.clone()))
            .collect()
    }

    pub fn record_ids(&self, offer_id: &str) -> HashSet<uuid::Uuid> {
        self.data
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(_, r)| r.offer_id == offer_id)
            .map(|(_, r)| r.id)
            .collect()
    }

    pub fn record_windows(&self, offer_id: &str) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.data
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(_, r)| r.offer_id == offer_id)
            .map(|(_, r)| (r.valid_from, r.valid_until))
            .collect()
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn get_offer_descriptor(
        &self,
        offer_id: &str,
        kind: OfferKind,
    ) -> Result<Option<OfferDescriptor>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .offers
            .get(&(kind, offer_id.to_string()))
            .map(|o| o.descriptor.clone()))
    }

    async fn list_active_outlets(&self, merchant_id: &str) -> Result<Vec<Outlet>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .outlets
            .iter()
            .filter(|o| o.merchant_id == merchant_id && o.is_active)
            .cloned()
            .collect())
    }

    async fn list_customer_types(
        &self,
        merchant_id: &str,
        types: Option<&[String]>,
    ) -> Result<Vec<CustomerType>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .customer_types
            .iter()
            .filter(|c| {
                c.merchant_id == merchant_id
                    && types.map_or(true, |wanted| wanted.contains(&c.type_label))
            })
            .cloned()
            .collect())
    }

    async fn list_offer_records(
        &self,
        offer_id: &str,
        kind: OfferKind,
    ) -> Result<Vec<EligibilityRecord>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .records
            .iter()
            .filter(|(_, r)| r.offer_id == offer_id && r.offer_type == kind)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn apply_eligibility_delta(
        &self,
        delta: &EligibilityDelta,
    ) -> Result<ApplyCounts, StoreError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_applies.load(Ordering::SeqCst) > 0 {
            self.fail_applies.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Transient("injected store failure".into()));
        }

        let offer_ids = self.delta_offer_ids(delta);
        {
            let mut in_flight = self.in_flight_offers.lock().unwrap();
            for id in &offer_ids {
                if !in_flight.insert(id.clone()) {
                    self.overlapping_applies.store(true, Ordering::SeqCst);
                }
            }
            self.peak_parallel_applies
                .fetch_max(in_flight.len() as u64, Ordering::SeqCst);
        }
        let delay = self.apply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut data = self.data.lock().unwrap();
        let now = Utc::now();
        let mut counts = ApplyCounts::default();

        for id in &delta.to_delete {
            let before = data.records.len();
            data.records.retain(|(_, r)| r.id != *id);
            counts.deleted += (before - data.records.len()) as u64;
        }

        for update in &delta.to_update {
            for (_, record) in data.records.iter_mut() {
                if record.id == update.id {
                    record.valid_from = update.valid_from;
                    record.valid_until = update.valid_until;
                    record.last_updated = now;
                    counts.updated += 1;
                }
            }
        }

        for new in &delta.to_create {
            // duplicate identity is skipped, mirroring ON CONFLICT DO NOTHING
            let exists = data.records.iter().any(|(_, r)| {
                r.user_id == new.user_id
                    && r.outlet_id == new.outlet_id
                    && r.offer_type == new.offer_type
                    && r.offer_id == new.offer_id
            });
            if exists {
                continue;
            }
            data.seq += 1;
            let seq = data.seq;
            data.records.push((
                seq,
                EligibilityRecord {
                    id: new.id,
                    user_id: new.user_id.clone(),
                    outlet_id: new.outlet_id.clone(),
                    offer_type: new.offer_type,
                    offer_id: new.offer_id.clone(),
                    merchant_id: new.merchant_id.clone(),
                    valid_from: new.valid_from,
                    valid_until: new.valid_until,
                    last_updated: now,
                },
            ));
            counts.created += 1;
        }
        drop(data);

        let mut in_flight = self.in_flight_offers.lock().unwrap();
        for id in &offer_ids {
            in_flight.remove(id);
        }

        Ok(counts)
    }

    async fn list_user_records(
        &self,
        user_id: &str,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<(Vec<EligibilityRecord>, i64), StoreError> {
        self.list_user_calls.fetch_add(1, Ordering::SeqCst);
        let data = self.data.lock().unwrap();
        let now = Utc::now();

        let mut matching: Vec<&(u64, EligibilityRecord)> = data
            .records
            .iter()
            .filter(|(_, r)| {
                r.user_id == user_id
                    && r.valid_from <= now
                    && r.valid_until >= now
                    && filter.outlet_id.as_ref().map_or(true, |o| &r.outlet_id == o)
                    && filter.offer_type.map_or(true, |k| r.offer_type == k)
            })
            .collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));

        let total = matching.len() as i64;
        let rows = matching
            .into_iter()
            .skip(page.skip.max(0) as usize)
            .take(page.take.max(0) as usize)
            .map(|(_, r)| r.clone())
            .collect();
        Ok((rows, total))
    }

    async fn get_offers_by_ids(
        &self,
        ids: &[String],
        kind: OfferKind,
    ) -> Result<Vec<OfferPayload>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| data.offers.get(&(kind, id.clone())).map(|o| o.payload.clone()))
            .collect())
    }

    async fn list_user_merchants(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().unwrap();
        let mut merchants: Vec<String> = data
            .customer_types
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.merchant_id.clone())
            .collect();
        merchants.sort();
        merchants.dedup();
        Ok(merchants)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    pub hits: AtomicU64,
    fail_invalidations: AtomicU32,
}

#[allow(dead_code)]
impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Makes the next `n` pattern invalidations fail with a backend error.
    pub fn fail_next_invalidations(&self, n: u32) {
        self.fail_invalidations.store(n, Ordering::SeqCst);
    }

    pub fn entry_ttl(&self, key_fragment: &str) -> Option<u64> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k.contains(key_fragment))
            .map(|(_, (_, ttl))| *ttl)
    }
}

/// '*'-only glob, the subset the engine's invalidation patterns use.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl CacheGateway for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.lock().unwrap();
        let value = entries.get(key).map(|(bytes, _)| bytes.clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), ttl_seconds));
        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        if self.fail_invalidations.load(Ordering::SeqCst) > 0 {
            self.fail_invalidations.fetch_sub(1, Ordering::SeqCst);
            return Err(CacheError::Backend("injected cache failure".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        Ok((before - entries.len()) as u64)
    }
}
