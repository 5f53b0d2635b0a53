//! Offer submission: records the buyer offer, then either queues it for the
//! workers or processes it right away. Both paths end in [`Pipeline::process`].

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{AgentError, Result};
use crate::negotiation::CommitReceipt;
use crate::types::{BuyerId, ItemId, TaskId};

use super::pipeline::{Pipeline, ProcessOutcome};
use super::queue::TaskQueue;
use super::task::OfferTrigger;

/// Process a trigger synchronously, folding failures into the outcome
pub async fn process_now(pipeline: &Pipeline, trigger: &OfferTrigger) -> ProcessOutcome {
    let started = Instant::now();
    match pipeline.process(trigger).await {
        Ok(outcome) => outcome,
        Err(e) => ProcessOutcome::failure(&e, started.elapsed().as_millis() as u64),
    }
}

/// Entry point for buyer offers
#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    queue: TaskQueue,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, queue: TaskQueue) -> Self {
        Self { pipeline, queue }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    async fn record(
        &self,
        item: ItemId,
        buyer: BuyerId,
        price: f64,
        message: &str,
    ) -> Result<(CommitReceipt, OfferTrigger)> {
        let ledger = self.pipeline.ledger();
        let receipt = ledger.submit_buyer_offer(item, buyer, price, message).await?;
        let listing = ledger.listing(item).await?;
        let trigger = OfferTrigger::from_receipt(&receipt, &listing)
            .ok_or_else(|| AgentError::Internal(format!("{} recorded without a price", receipt.offer.id)))?;
        Ok((receipt, trigger))
    }

    /// Record the offer and queue it, honoring the seller's response delay
    pub async fn submit_queued(
        &self,
        item: ItemId,
        buyer: BuyerId,
        price: f64,
        message: &str,
    ) -> Result<(CommitReceipt, TaskId)> {
        let (receipt, trigger) = self.record(item, buyer, price, message).await?;
        let config = self.pipeline.configs().get(trigger.seller_id).await;
        let not_before = Utc::now() + config.response_delay();
        let task = self.queue.enqueue(trigger, not_before).await;
        Ok((receipt, task))
    }

    /// Record the offer and answer it in the same call
    pub async fn submit_immediate(
        &self,
        item: ItemId,
        buyer: BuyerId,
        price: f64,
        message: &str,
    ) -> Result<(CommitReceipt, ProcessOutcome)> {
        let (receipt, trigger) = self.record(item, buyer, price, message).await?;
        let outcome = process_now(&self.pipeline, &trigger).await;
        Ok((receipt, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentSettings, SellerAgentConfiguration, SellerConfigStore};
    use crate::dispatch::task::TaskStatus;
    use crate::negotiation::{DecisionKind, Ledger, Listing};
    use crate::types::SellerId;

    async fn dispatcher() -> Dispatcher {
        let ledger = Ledger::default();
        ledger
            .register_listing(
                Listing::new(ItemId(1), SellerId(1), "Desk", "furniture", "like_new", 500.0)
                    .with_target_price(450.0),
            )
            .await
            .unwrap();
        let pipeline = Pipeline::new(ledger, SellerConfigStore::new(), AgentSettings::default());
        Dispatcher::new(Arc::new(pipeline), TaskQueue::new())
    }

    #[tokio::test]
    async fn test_immediate_path_answers_offer() {
        let dispatcher = dispatcher().await;
        let (receipt, outcome) = dispatcher
            .submit_immediate(ItemId(1), BuyerId(1), 460.0, "Can pick up today")
            .await
            .unwrap();

        assert!(receipt.opened);
        assert!(outcome.success);
        assert_eq!(outcome.decision, Some(DecisionKind::Accept));
    }

    #[tokio::test]
    async fn test_immediate_path_reports_failures() {
        let dispatcher = dispatcher().await;
        dispatcher
            .pipeline()
            .ledger()
            .set_item_agent_enabled(ItemId(1), false)
            .await
            .unwrap();

        let (_, outcome) = dispatcher
            .submit_immediate(ItemId(1), BuyerId(1), 300.0, "")
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.action_result.error.is_some());
    }

    #[tokio::test]
    async fn test_queued_path_honors_response_delay() {
        let dispatcher = dispatcher().await;
        dispatcher
            .pipeline()
            .configs()
            .update(
                SellerId(1),
                SellerAgentConfiguration {
                    response_delay_minutes: 10,
                    ..SellerAgentConfiguration::default()
                },
            )
            .await
            .unwrap();

        let (_, task) = dispatcher
            .submit_queued(ItemId(1), BuyerId(1), 300.0, "")
            .await
            .unwrap();

        assert_eq!(dispatcher.queue().get(task).await.unwrap().status, TaskStatus::Pending);
        assert!(dispatcher.queue().next_pending(Utc::now()).await.is_none());
        assert!(dispatcher
            .queue()
            .next_pending(Utc::now() + chrono::Duration::minutes(11))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_bad_offer_is_rejected_before_dispatch() {
        let dispatcher = dispatcher().await;
        let err = dispatcher
            .submit_queued(ItemId(1), BuyerId(1), 10.0, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Commit(_)));
        assert_eq!(dispatcher.queue().outstanding().await, 0);
    }
}
