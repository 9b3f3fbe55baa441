use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use perk_core::{StoreGateway, SyncError};
use perk_shared::models::{
    EligibilityDelta, EligibilityRecord, NewEligibilityRecord, OfferKind, RecordUpdate,
};
use tracing::debug;
use uuid::Uuid;

/// Fallback validity length for offers without stored dates (Loyalty).
const DEFAULT_WINDOW_DAYS: i64 = 365;

/// What eligibility SHOULD look like for one offer
#[derive(Debug)]
pub enum DesiredState {
    /// No eligibility should exist: offer missing, inactive, soft-deleted,
    /// or its merchant has no active outlet.
    Tombstone,
    Live {
        /// Every (user_id, outlet_id) pair that should hold a record.
        pairs: HashSet<(String, String)>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
}

/// Computes the minimal create/update/delete set reconciling the stored
/// eligibility rows with what the offer definition implies. Pure given a
/// store snapshot: rerunning against an unchanged store yields an empty delta.
pub struct DiffEngine {
    store: Arc<dyn StoreGateway>,
}

impl DiffEngine {
    pub fn new(store: Arc<dyn StoreGateway>) -> Self {
        Self { store }
    }

    pub async fn compute_desired_state(
        &self,
        offer_id: &str,
        kind: OfferKind,
        merchant_id: &str,
    ) -> Result<DesiredState, SyncError> {
        let Some(descriptor) = self.store.get_offer_descriptor(offer_id, kind).await? else {
            debug!("offer {} ({}) not found, tombstoning", offer_id, kind);
            return Ok(DesiredState::Tombstone);
        };
        if !descriptor.is_live() {
            debug!("offer {} ({}) inactive or deleted, tombstoning", offer_id, kind);
            return Ok(DesiredState::Tombstone);
        }

        let outlets = self.store.list_active_outlets(merchant_id).await?;
        if outlets.is_empty() {
            debug!("merchant {} has no active outlets, tombstoning {}", merchant_id, offer_id);
            return Ok(DesiredState::Tombstone);
        }

        let customers = if descriptor.wants_all_types() {
            self.store.list_customer_types(merchant_id, None).await?
        } else {
            self.store
                .list_customer_types(merchant_id, Some(&descriptor.eligible_customer_types))
                .await?
        };

        let now = Utc::now();
        let valid_from = descriptor.start_date.unwrap_or(now);
        let valid_until = descriptor
            .end_date
            .unwrap_or(now + Duration::days(DEFAULT_WINDOW_DAYS));

        let mut pairs = HashSet::with_capacity(customers.len() * outlets.len());
        for customer in &customers {
            for outlet in &outlets {
                pairs.insert((customer.user_id.clone(), outlet.id.clone()));
            }
        }

        Ok(DesiredState::Live {
            pairs,
            valid_from,
            valid_until,
        })
    }

    /// Desired state diffed against the actual rows stored for this offer.
    pub async fn compute_diff(
        &self,
        offer_id: &str,
        kind: OfferKind,
        merchant_id: &str,
    ) -> Result<EligibilityDelta, SyncError> {
        let desired = self.compute_desired_state(offer_id, kind, merchant_id).await?;
        let actual = self.store.list_offer_records(offer_id, kind).await?;
        Ok(reconcile(offer_id, kind, merchant_id, desired, actual))
    }
}

/// Buckets the difference between desired and actual into create / update /
/// delete by the composite key (user_id, outlet_id). Pure and synchronous so
/// the bucketing rules are testable without a store.
pub fn reconcile(
    offer_id: &str,
    kind: OfferKind,
    merchant_id: &str,
    desired: DesiredState,
    actual: Vec<EligibilityRecord>,
) -> EligibilityDelta {
    let mut delta = EligibilityDelta::default();

    let (mut pairs, valid_from, valid_until) = match desired {
        DesiredState::Tombstone => {
            delta.to_delete = actual.into_iter().map(|r| r.id).collect();
            return delta;
        }
        DesiredState::Live {
            pairs,
            valid_from,
            valid_until,
        } => (pairs, valid_from, valid_until),
    };

    for record in actual {
        let key = (record.user_id.clone(), record.outlet_id.clone());
        if pairs.remove(&key) {
            if record.valid_from != valid_from || record.valid_until != valid_until {
                delta.to_update.push(RecordUpdate {
                    id: record.id,
                    valid_from,
                    valid_until,
                });
            }
        } else {
            delta.to_delete.push(record.id);
        }
    }

    for (user_id, outlet_id) in pairs {
        delta.to_create.push(NewEligibilityRecord {
            id: Uuid::new_v4(),
            user_id,
            outlet_id,
            offer_type: kind,
            offer_id: offer_id.to_string(),
            merchant_id: merchant_id.to_string(),
            valid_from,
            valid_until,
        });
    }

    delta
}
