use std::sync::Arc;

use perk_core::{CacheGateway, StoreGateway, SyncError};
use perk_shared::events::OfferChangeEvent;
use perk_shared::models::{ApplyCounts, OfferKind};
use tracing::info;

use crate::diff::DiffEngine;
use crate::writer::TransactionalWriter;

/// Processes one offer-change event: parse the kind, compute the diff,
/// apply it. Redelivery of the same event is safe because the diff is
/// idempotent against an unchanged store.
pub struct Worker {
    diff: DiffEngine,
    writer: TransactionalWriter,
}

impl Worker {
    pub fn new(store: Arc<dyn StoreGateway>, cache: Arc<dyn CacheGateway>) -> Self {
        Self {
            diff: DiffEngine::new(store.clone()),
            writer: TransactionalWriter::new(store, cache),
        }
    }

    pub async fn handle(&self, event: &OfferChangeEvent) -> Result<ApplyCounts, SyncError> {
        let kind = OfferKind::parse(&event.offer_type)
            .ok_or_else(|| SyncError::UnknownOfferKind(event.offer_type.clone()))?;

        let delta = self
            .diff
            .compute_diff(&event.offer_id, kind, &event.merchant_id)
            .await?;
        info!(
            "recomputed eligibility for offer {} ({:?} {}): +{} ~{} -{}",
            event.offer_id,
            event.event_type,
            kind,
            delta.to_create.len(),
            delta.to_update.len(),
            delta.to_delete.len()
        );

        self.writer.apply(&event.merchant_id, &delta).await
    }
}
