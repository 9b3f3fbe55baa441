use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use perk_core::RetryPolicy;
use perk_shared::events::{JobEnvelope, OfferChangeEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::worker::Worker;

#[derive(Debug, thiserror::Error)]
#[error("job channel is closed")]
pub struct QueueClosed;

/// A job that exhausted its retry budget or failed fatally, retained for
/// operator inspection.
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub envelope: JobEnvelope,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// At-least-once in-process delivery of offer-change events.
///
/// Events are routed to `hash(offer_id) % lanes`; each lane is a single
/// task, so two events for the same offer are never processed concurrently
/// and always in delivery order. Different offers spread across lanes for
/// bounded parallelism. Failed retryable jobs are re-enqueued onto their
/// own lane after a backoff delay; terminal failures land in the
/// dead-letter list.
pub struct JobChannel {
    senders: Vec<mpsc::UnboundedSender<JobEnvelope>>,
    lanes: Vec<JoinHandle<()>>,
    dead_letters: Arc<Mutex<Vec<FailedJob>>>,
}

impl JobChannel {
    pub fn start(worker: Arc<Worker>, concurrency: usize, retry: RetryPolicy) -> Self {
        let lane_count = concurrency.max(1);
        let dead_letters = Arc::new(Mutex::new(Vec::new()));
        let mut senders = Vec::with_capacity(lane_count);
        let mut lanes = Vec::with_capacity(lane_count);

        for lane in 0..lane_count {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.push(tokio::spawn(run_lane(
                lane,
                rx,
                // Weak so scheduled retries don't keep the lane alive forever.
                tx.downgrade(),
                worker.clone(),
                retry.clone(),
                dead_letters.clone(),
            )));
            senders.push(tx);
        }

        info!("job channel started with {} lanes", lane_count);
        Self {
            senders,
            lanes,
            dead_letters,
        }
    }

    /// Enqueues and returns immediately; processing is asynchronous.
    pub fn enqueue(&self, event: OfferChangeEvent) -> Result<(), QueueClosed> {
        let lane = lane_for(&event.offer_id, self.senders.len());
        self.senders[lane]
            .send(JobEnvelope::new(event))
            .map_err(|_| QueueClosed)
    }

    /// Terminally failed jobs, for operational tooling.
    pub fn failed_jobs(&self) -> Vec<FailedJob> {
        self.dead_letters.lock().expect("dead-letter lock poisoned").clone()
    }

    /// Drops the senders and waits for every lane to drain its queue and
    /// exit. Retries still sleeping at this point are dropped.
    pub async fn shutdown(self) {
        drop(self.senders);
        for lane in self.lanes {
            let _ = lane.await;
        }
    }
}

fn lane_for(offer_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    offer_id.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

async fn run_lane(
    lane: usize,
    mut rx: mpsc::UnboundedReceiver<JobEnvelope>,
    requeue: mpsc::WeakUnboundedSender<JobEnvelope>,
    worker: Arc<Worker>,
    retry: RetryPolicy,
    dead_letters: Arc<Mutex<Vec<FailedJob>>>,
) {
    while let Some(mut job) = rx.recv().await {
        let event = job.event.clone();
        match worker.handle(&event).await {
            Ok(_) => {}
            Err(e) if !e.is_retryable() => {
                // Malformed or fatal: retrying cannot fix it, drop the job.
                error!(
                    "lane {} dropping job for offer {}: {}",
                    lane, event.offer_id, e
                );
                dead_letters
                    .lock()
                    .expect("dead-letter lock poisoned")
                    .push(FailedJob {
                        envelope: job,
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });
            }
            Err(e) if retry.exhausted(job.retry_count) => {
                error!(
                    "lane {} giving up on offer {} after {} attempts: {}",
                    lane,
                    event.offer_id,
                    job.retry_count + 1,
                    e
                );
                dead_letters
                    .lock()
                    .expect("dead-letter lock poisoned")
                    .push(FailedJob {
                        envelope: job,
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });
            }
            Err(e) => {
                let delay = retry.delay_for(job.retry_count);
                job.retry_count += 1;
                warn!(
                    "lane {} retrying offer {} in {:?} (retry {}): {}",
                    lane, event.offer_id, delay, job.retry_count, e
                );
                let requeue = requeue.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    match requeue.upgrade() {
                        Some(tx) => {
                            let _ = tx.send(job);
                        }
                        None => warn!(
                            "lane {} closed before retry of offer {} could run",
                            lane, job.event.offer_id
                        ),
                    }
                });
            }
        }
    }
}
