//! Background queue workers

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorClass;

use super::pipeline::Pipeline;
use super::queue::TaskQueue;
use super::task::Task;

/// Expiry sweeps run once every this many poll intervals
const SWEEP_EVERY_POLLS: u32 = 20;

/// Completed and failed tasks are kept this long after they finish
pub const FINISHED_TASK_RETENTION_MINUTES: i64 = 60;

/// Poll interval plus up to 25% jitter so idle workers do not wake in lockstep
fn jittered(poll: Duration) -> Duration {
    let max_jitter = (poll.as_millis() as u64 / 4).max(1);
    poll + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}

/// A fixed set of polling workers over one queue
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `settings.workers` workers and the expiry sweeper
    pub fn start(pipeline: Arc<Pipeline>, queue: TaskQueue) -> Self {
        let cancel = CancellationToken::new();
        let workers = pipeline.settings().workers;
        let poll = pipeline.settings().poll_interval();

        let mut handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                let pipeline = pipeline.clone();
                let queue = queue.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker, pipeline, queue, poll, cancel).await;
                })
            })
            .collect();

        let sweeper_pipeline = pipeline.clone();
        let sweeper_queue = queue.clone();
        let sweeper_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let every = (poll * SWEEP_EVERY_POLLS).max(Duration::from_millis(1));
            run_sweeper(sweeper_pipeline, sweeper_queue, every, sweeper_cancel).await;
        }));

        tracing::info!(workers, poll_ms = poll.as_millis() as u64, "Worker pool started");
        Self { handles, cancel }
    }

    /// Stop polling and wait for in-flight tasks to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    pipeline: Arc<Pipeline>,
    queue: TaskQueue,
    poll: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "Worker started");
    while !cancel.is_cancelled() {
        match queue.claim_next(Utc::now()).await {
            Some(task) => run_task(worker, &pipeline, &queue, task).await,
            None => {
                let delay = jittered(poll);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    tracing::debug!(worker, "Worker stopped");
}

/// Process one claimed task and record how it ended
pub async fn run_task(worker: usize, pipeline: &Pipeline, queue: &TaskQueue, task: Task) {
    tracing::debug!(worker, task = %task.id, negotiation = %task.trigger.negotiation_id, "Processing task");

    let finished = match pipeline.process(&task.trigger).await {
        Ok(outcome) => queue.mark_completed(task.id, Some(outcome.action_result.action)).await,
        Err(e) if e.class() == ErrorClass::Staleness => {
            queue.mark_completed(task.id, Some(format!("discarded: {}", e))).await
        }
        Err(e) => queue.mark_failed(task.id, e.to_string()).await,
    };

    if let Err(e) = finished {
        tracing::error!(worker, task = %task.id, error = %e, "Could not finish task");
    }
}

/// One sweep: expire idle negotiations, then drop old finished tasks
async fn sweep(pipeline: &Pipeline, queue: &TaskQueue, now: DateTime<Utc>) {
    let expired = pipeline.ledger().expire_stale(now).await;
    if !expired.is_empty() {
        tracing::info!(count = expired.len(), "Expired stale negotiations");
    }

    let cutoff = now - chrono::Duration::minutes(FINISHED_TASK_RETENTION_MINUTES);
    let pruned = queue.prune_finished(cutoff).await;
    if pruned > 0 {
        tracing::debug!(count = pruned, "Pruned finished tasks");
    }
}

async fn run_sweeper(
    pipeline: Arc<Pipeline>,
    queue: TaskQueue,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => sweep(&pipeline, &queue, Utc::now()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentSettings, SellerConfigStore};
    use crate::dispatch::task::{OfferTrigger, TaskStatus};
    use crate::negotiation::{Ledger, Listing, NegotiationStatus};
    use crate::types::{BuyerId, ItemId, NegotiationId, OfferId, SellerId};

    #[test]
    fn test_jitter_bounds() {
        let poll = Duration::from_millis(100);
        for _ in 0..50 {
            let delay = jittered(poll);
            assert!(delay >= poll && delay <= Duration::from_millis(125));
        }
    }

    fn trigger(offer: u64) -> OfferTrigger {
        OfferTrigger {
            negotiation_id: NegotiationId(1),
            offer_id: OfferId(offer),
            seller_id: SellerId(1),
            item_id: ItemId(1),
            listing_price: 200.0,
            offer_price: 150.0,
            category: "chair".to_string(),
        }
    }

    async fn pipeline() -> Arc<Pipeline> {
        let ledger = Ledger::default();
        ledger
            .register_listing(
                Listing::new(ItemId(1), SellerId(1), "Chair", "chair", "good", 200.0)
                    .with_target_price(200.0),
            )
            .await
            .unwrap();
        let settings = AgentSettings {
            workers: 2,
            poll_interval_ms: 5,
            ..AgentSettings::default()
        };
        Arc::new(Pipeline::new(ledger, SellerConfigStore::new(), settings))
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let pipeline = pipeline().await;
        let queue = TaskQueue::new();

        let receipt = pipeline
            .ledger()
            .submit_buyer_offer(ItemId(1), BuyerId(1), 195.0, "")
            .await
            .unwrap();
        let listing = pipeline.ledger().listing(ItemId(1)).await.unwrap();
        let trigger = OfferTrigger::from_receipt(&receipt, &listing).unwrap();
        let id = queue.enqueue(trigger, Utc::now()).await;

        let pool = WorkerPool::start(pipeline.clone(), queue.clone());
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle(Duration::from_millis(5)))
            .await
            .unwrap();
        pool.shutdown().await;

        assert_eq!(queue.get(id).await.unwrap().status, TaskStatus::Completed);
        let snapshot = pipeline.ledger().snapshot(receipt.negotiation).await.unwrap();
        assert_eq!(snapshot.status(), NegotiationStatus::Completed);
    }

    #[tokio::test]
    async fn test_stale_task_completes_as_discarded() {
        let pipeline = pipeline().await;
        let queue = TaskQueue::new();
        let listing = pipeline.ledger().listing(ItemId(1)).await.unwrap();

        let first = pipeline
            .ledger()
            .submit_buyer_offer(ItemId(1), BuyerId(1), 120.0, "")
            .await
            .unwrap();
        let stale = OfferTrigger::from_receipt(&first, &listing).unwrap();
        pipeline
            .ledger()
            .submit_buyer_offer(ItemId(1), BuyerId(1), 130.0, "")
            .await
            .unwrap();

        let id = queue.enqueue(stale, Utc::now()).await;
        let task = queue.claim_next(Utc::now()).await.unwrap();
        run_task(0, &pipeline, &queue, task).await;

        let task = queue.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.note.unwrap().starts_with("discarded"));
        assert_eq!(pipeline.ledger().offer_count().await, 2);
    }

    #[tokio::test]
    async fn test_sweep_prunes_only_expired_finished_tasks() {
        let pipeline = pipeline().await;
        let queue = TaskQueue::new();
        let now = Utc::now();
        let old = queue.enqueue(trigger(1), now).await;
        let pending = queue.enqueue(trigger(2), now).await;
        queue.mark_processing(old).await.unwrap();
        queue.mark_completed(old, None).await.unwrap();

        sweep(&pipeline, &queue, Utc::now()).await;
        assert!(queue.get(old).await.is_some());

        let later = Utc::now() + chrono::Duration::minutes(FINISHED_TASK_RETENTION_MINUTES + 1);
        sweep(&pipeline, &queue, later).await;
        assert!(queue.get(old).await.is_none());
        assert_eq!(queue.get(pending).await.unwrap().status, TaskStatus::Pending);
    }
}
