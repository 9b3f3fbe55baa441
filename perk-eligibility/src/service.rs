use std::sync::Arc;

use chrono::Utc;
use perk_core::{CacheGateway, CacheTtl, RetryPolicy, StoreGateway, SyncError};
use perk_shared::events::{ChangeType, OfferChangeEvent};

use crate::queue::{FailedJob, JobChannel, QueueClosed};
use crate::read::{OfferFeed, OfferQuery, ReadPath};
use crate::worker::Worker;

/// Tunables for one engine instance
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Number of worker lanes pulling jobs in parallel.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub ttl: CacheTtl,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
            ttl: CacheTtl::default(),
        }
    }
}

/// The engine's caller-facing surface: a write trigger that only enqueues,
/// and the cache-aside read query. Transport (HTTP, GraphQL, queues) is the
/// embedder's concern.
pub struct EligibilityService {
    channel: JobChannel,
    read: ReadPath,
}

impl EligibilityService {
    pub fn start(
        store: Arc<dyn StoreGateway>,
        cache: Arc<dyn CacheGateway>,
        config: ServiceConfig,
    ) -> Self {
        let worker = Arc::new(Worker::new(store.clone(), cache.clone()));
        let channel = JobChannel::start(worker, config.concurrency, config.retry);
        let read = ReadPath::new(store, cache, config.ttl);
        Self { channel, read }
    }

    /// Enqueues a recomputation job and returns immediately. Eligibility
    /// failures are never visible here; they surface via `failed_jobs`.
    pub fn notify_offer_changed(
        &self,
        offer_id: &str,
        offer_kind: &str,
        merchant_id: &str,
        event_type: ChangeType,
    ) -> Result<(), QueueClosed> {
        self.channel.enqueue(OfferChangeEvent {
            event_type,
            offer_type: offer_kind.to_string(),
            offer_id: offer_id.to_string(),
            merchant_id: merchant_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub async fn get_offers(&self, query: &OfferQuery) -> Result<OfferFeed, SyncError> {
        self.read.query(query).await
    }

    /// Jobs that failed terminally, for operational tooling.
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.channel.failed_jobs()
    }

    /// Drains queued jobs and stops the worker lanes.
    pub async fn shutdown(self) {
        self.channel.shutdown().await;
    }
}
