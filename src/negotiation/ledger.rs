//! Negotiation ledger: append-only offer history per negotiation
//!
//! The ledger is the single shared mutable resource. Reads hand out cloned
//! [`NegotiationSnapshot`]s; every write goes through the commit protocol in
//! one write-lock critical section, so check-and-append is atomic.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::AgentSettings;
use crate::error::{AgentError, Result};
use crate::types::{BuyerId, DecisionId, ItemId, NegotiationId, OfferId};

use super::commit::{self, CommitAction, CommitReceipt, CommitRequest};
use super::session::NegotiationSnapshot;
use super::types::{AgentDecision, Listing, Negotiation};

/// Defaults applied to negotiations the ledger opens
#[derive(Clone, Debug)]
pub struct LedgerSettings {
    pub max_rounds: u32,
    pub ttl: chrono::Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            ttl: chrono::Duration::days(7),
        }
    }
}

impl From<&AgentSettings> for LedgerSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_rounds: settings.max_rounds,
            ttl: settings.negotiation_ttl(),
        }
    }
}

/// Everything the ledger stores. Only `commit` mutates it.
#[derive(Default)]
pub(crate) struct LedgerState {
    pub(crate) listings: HashMap<ItemId, Listing>,
    pub(crate) negotiations: BTreeMap<NegotiationId, Negotiation>,
    pub(crate) offers: HashMap<NegotiationId, Vec<super::types::Offer>>,
    pub(crate) decisions: Vec<AgentDecision>,
    next_negotiation: u64,
    next_offer: u64,
    next_decision: u64,
}

impl LedgerState {
    pub(crate) fn allocate_negotiation_id(&mut self) -> NegotiationId {
        self.next_negotiation += 1;
        NegotiationId(self.next_negotiation)
    }

    pub(crate) fn allocate_offer_id(&mut self) -> OfferId {
        self.next_offer += 1;
        OfferId(self.next_offer)
    }

    pub(crate) fn allocate_decision_id(&mut self) -> DecisionId {
        self.next_decision += 1;
        DecisionId(self.next_decision)
    }

    fn snapshot(&self, id: NegotiationId) -> Result<NegotiationSnapshot> {
        let negotiation = self
            .negotiations
            .get(&id)
            .ok_or_else(|| AgentError::NegotiationNotFound(id.to_string()))?;
        let listing = self
            .listings
            .get(&negotiation.item)
            .ok_or_else(|| AgentError::ListingNotFound(negotiation.item.to_string()))?;

        Ok(NegotiationSnapshot {
            negotiation: negotiation.clone(),
            listing: listing.clone(),
            offers: self.offers.get(&id).cloned().unwrap_or_default(),
        })
    }
}

/// The shared negotiation ledger
#[derive(Clone)]
pub struct Ledger {
    state: Arc<RwLock<LedgerState>>,
    settings: LedgerSettings,
}

impl Ledger {
    /// Create an empty in-memory ledger
    pub fn new(settings: LedgerSettings) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            settings,
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Register the listing projection the core negotiates over
    pub async fn register_listing(&self, listing: Listing) -> Result<()> {
        crate::types::validate_price(listing.listing_price, "listing price")?;
        if let Some(target) = listing.target_price {
            crate::types::validate_price(target, "target price")?;
        }
        if let Some(urgency) = listing.urgency {
            if !(0.0..=1.0).contains(&urgency) {
                return Err(AgentError::InvalidInput(format!(
                    "urgency must be in [0, 1], got {}",
                    urgency
                )));
            }
        }

        let mut state = self.state.write().await;
        if state.listings.contains_key(&listing.id) {
            return Err(AgentError::ListingExists(listing.id.to_string()));
        }
        tracing::info!(item = %listing.id, price = listing.listing_price, "Registered listing");
        state.listings.insert(listing.id, listing);
        Ok(())
    }

    pub async fn listing(&self, item: ItemId) -> Result<Listing> {
        self.state
            .read()
            .await
            .listings
            .get(&item)
            .cloned()
            .ok_or_else(|| AgentError::ListingNotFound(item.to_string()))
    }

    /// Toggle the per-item agent flag
    pub async fn set_item_agent_enabled(&self, item: ItemId, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let listing = state
            .listings
            .get_mut(&item)
            .ok_or_else(|| AgentError::ListingNotFound(item.to_string()))?;
        listing.agent_enabled = enabled;
        Ok(())
    }

    /// Take a consistent snapshot of one negotiation
    pub async fn snapshot(&self, id: NegotiationId) -> Result<NegotiationSnapshot> {
        self.state.read().await.snapshot(id)
    }

    /// Snapshots of every other active negotiation on the same item
    pub async fn sibling_snapshots(&self, id: NegotiationId) -> Result<Vec<NegotiationSnapshot>> {
        let state = self.state.read().await;
        let item = state
            .negotiations
            .get(&id)
            .ok_or_else(|| AgentError::NegotiationNotFound(id.to_string()))?
            .item;

        state
            .negotiations
            .values()
            .filter(|n| n.item == item && n.id != id && n.status.is_active())
            .map(|n| state.snapshot(n.id))
            .collect()
    }

    /// Snapshots of every negotiation on an item, in creation order
    pub async fn item_snapshots(&self, item: ItemId) -> Result<Vec<NegotiationSnapshot>> {
        let state = self.state.read().await;
        state
            .negotiations
            .values()
            .filter(|n| n.item == item)
            .map(|n| state.snapshot(n.id))
            .collect()
    }

    /// Audit records written for a negotiation
    pub async fn decisions(&self, id: NegotiationId) -> Vec<AgentDecision> {
        self.state
            .read()
            .await
            .decisions
            .iter()
            .filter(|d| d.record.negotiation == id)
            .cloned()
            .collect()
    }

    pub async fn decision_count(&self) -> usize {
        self.state.read().await.decisions.len()
    }

    /// Total number of ledger entries across all negotiations
    pub async fn offer_count(&self) -> usize {
        self.state.read().await.offers.values().map(Vec::len).sum()
    }

    /// Submit a buyer offer. Opens a negotiation on the buyer's first offer for
    /// the item, otherwise appends to the buyer's active negotiation.
    pub async fn submit_buyer_offer(
        &self,
        item: ItemId,
        buyer: BuyerId,
        price: f64,
        message: impl Into<String>,
    ) -> Result<CommitReceipt> {
        let message = message.into();
        let now = Utc::now();
        let mut state = self.state.write().await;

        let existing = state
            .negotiations
            .values()
            .find(|n| n.item == item && n.buyer == buyer && n.status.is_active())
            .map(|n| n.id);

        let receipt = match existing {
            Some(negotiation) => {
                let request = CommitRequest::new(negotiation, CommitAction::BuyerOffer { price })
                    .with_message(message);
                commit::apply(&mut state, request, now)?
            }
            None => commit::open(&mut state, item, buyer, price, message, &self.settings, now)?,
        };

        tracing::info!(
            negotiation = %receipt.negotiation,
            offer = %receipt.offer.id,
            round = receipt.offer.round,
            price,
            opened = receipt.opened,
            "Buyer offer recorded"
        );
        Ok(receipt)
    }

    /// Atomically validate and apply a state transition
    pub async fn commit(&self, request: CommitRequest) -> Result<CommitReceipt> {
        self.commit_at(request, Utc::now()).await
    }

    /// [`Ledger::commit`] with an explicit clock
    pub async fn commit_at(&self, request: CommitRequest, now: DateTime<Utc>) -> Result<CommitReceipt> {
        let negotiation = request.negotiation;
        let action = request.action.name();
        let mut state = self.state.write().await;

        match commit::apply(&mut state, request, now) {
            Ok(receipt) => {
                tracing::info!(
                    negotiation = %negotiation,
                    action,
                    round = receipt.offer.round,
                    status = %receipt.status,
                    "Committed"
                );
                Ok(receipt)
            }
            Err(rejection) => {
                tracing::warn!(negotiation = %negotiation, action, %rejection, "Commit rejected");
                Err(rejection.into())
            }
        }
    }

    /// Cancel every active negotiation whose expiry has passed
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Vec<NegotiationId> {
        let mut state = self.state.write().await;
        let expired: Vec<NegotiationId> = state
            .negotiations
            .values()
            .filter(|n| n.status.is_active() && n.is_expired(now))
            .map(|n| n.id)
            .collect();

        expired
            .into_iter()
            .filter(|id| match commit::expire(&mut state, *id, now) {
                Ok(_) => true,
                Err(rejection) => {
                    tracing::warn!(negotiation = %id, %rejection, "Expiry skipped");
                    false
                }
            })
            .collect()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LedgerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::market::Momentum;
    use crate::negotiation::commit::CommitRejection;
    use crate::negotiation::{DecisionKind, DecisionRecord, MarketSnapshot, NegotiationStatus};
    use crate::types::{SellerId, Side};

    async fn ledger_with_listing(price: f64) -> Ledger {
        let ledger = Ledger::default();
        ledger
            .register_listing(Listing::new(ItemId(1), SellerId(1), "Sofa", "couch", "good", price))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_first_offer_opens_negotiation() {
        let ledger = ledger_with_listing(1000.0).await;

        let receipt = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(7), 700.0, "Would you take 700?")
            .await
            .unwrap();

        assert!(receipt.opened);
        assert_eq!(receipt.offer.round, 1);
        let snap = ledger.snapshot(receipt.negotiation).await.unwrap();
        assert_eq!(snap.status(), NegotiationStatus::Active);
        assert_eq!(snap.latest_buyer_price(), Some(700.0));
    }

    #[tokio::test]
    async fn test_buyer_may_replace_pending_offer() {
        let ledger = ledger_with_listing(1000.0).await;
        let first = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(7), 600.0, "")
            .await
            .unwrap();
        let second = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(7), 650.0, "")
            .await
            .unwrap();

        assert_eq!(first.negotiation, second.negotiation);
        assert_eq!(second.offer.round, 2);
        assert!(!second.opened);
    }

    #[tokio::test]
    async fn test_buyer_offer_bounds() {
        let ledger = ledger_with_listing(1000.0).await;
        let err = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(7), 50.0, "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Commit(CommitRejection::PriceOutOfBounds { .. })
        ));
        assert_eq!(ledger.offer_count().await, 0);
    }

    #[tokio::test]
    async fn test_counter_then_seller_entry_is_turn_violation() {
        let ledger = ledger_with_listing(1000.0).await;
        let opened = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(7), 800.0, "")
            .await
            .unwrap();

        ledger
            .commit(
                CommitRequest::new(opened.negotiation, CommitAction::Counter { price: 900.0 })
                    .acting_on(opened.offer.id),
            )
            .await
            .unwrap();

        let err = ledger
            .commit(CommitRequest::new(opened.negotiation, CommitAction::Wait))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Commit(CommitRejection::TurnViolation { .. })
        ));
        assert_eq!(err.class(), ErrorClass::Staleness);
    }

    #[tokio::test]
    async fn test_accept_completes_and_cancels_siblings() {
        let ledger = ledger_with_listing(1000.0).await;
        let winner = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(1), 950.0, "")
            .await
            .unwrap();
        let loser = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(2), 700.0, "")
            .await
            .unwrap();

        let receipt = ledger
            .commit(
                CommitRequest::new(winner.negotiation, CommitAction::Accept)
                    .acting_on(winner.offer.id),
            )
            .await
            .unwrap();

        assert_eq!(receipt.status, NegotiationStatus::Completed);
        assert_eq!(receipt.cancelled_siblings, vec![loser.negotiation]);

        let won = ledger.snapshot(winner.negotiation).await.unwrap();
        assert_eq!(won.negotiation.final_price, Some(950.0));
        assert!(won.listing.sold);

        let lost = ledger.snapshot(loser.negotiation).await.unwrap();
        assert_eq!(lost.status(), NegotiationStatus::Cancelled);
        assert_eq!(lost.latest_offer().unwrap().side, Side::Seller);
        assert_eq!(lost.current_round(), 2);

        let err = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(3), 900.0, "")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Commit(CommitRejection::ItemSold(_))));
    }

    #[tokio::test]
    async fn test_terminal_state_absorbs() {
        let ledger = ledger_with_listing(1000.0).await;
        let opened = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(1), 400.0, "")
            .await
            .unwrap();
        ledger
            .commit(
                CommitRequest::new(opened.negotiation, CommitAction::Decline)
                    .acting_on(opened.offer.id),
            )
            .await
            .unwrap();

        let before = ledger.offer_count().await;
        let err = ledger
            .commit(
                CommitRequest::new(opened.negotiation, CommitAction::Accept)
                    .acting_on(opened.offer.id),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Commit(CommitRejection::WrongStatus { .. })
        ));
        assert_eq!(ledger.offer_count().await, before);
    }

    #[tokio::test]
    async fn test_deal_pending_then_confirm() {
        let ledger = ledger_with_listing(1000.0).await;
        let opened = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(1), 800.0, "")
            .await
            .unwrap();
        let counter = ledger
            .commit(
                CommitRequest::new(opened.negotiation, CommitAction::Counter { price: 900.0 })
                    .acting_on(opened.offer.id),
            )
            .await
            .unwrap();

        let pending = ledger
            .commit(
                CommitRequest::new(opened.negotiation, CommitAction::BuyerAcceptCounter)
                    .acting_on(counter.offer.id),
            )
            .await
            .unwrap();
        assert_eq!(pending.status, NegotiationStatus::DealPending);

        let done = ledger
            .commit(CommitRequest::new(opened.negotiation, CommitAction::ConfirmDeal))
            .await
            .unwrap();
        assert_eq!(done.status, NegotiationStatus::Completed);
        assert_eq!(done.offer.price, Some(900.0));
        assert_eq!(done.offer.round, 4);
    }

    #[tokio::test]
    async fn test_expired_negotiation_rejects_and_sweeps() {
        let ledger = ledger_with_listing(1000.0).await;
        let opened = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(1), 800.0, "")
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::days(8);
        let err = ledger
            .commit_at(
                CommitRequest::new(opened.negotiation, CommitAction::Accept)
                    .acting_on(opened.offer.id),
                later,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Commit(CommitRejection::Expired(_))));

        let expired = ledger.expire_stale(later).await;
        assert_eq!(expired, vec![opened.negotiation]);
        let snap = ledger.snapshot(opened.negotiation).await.unwrap();
        assert_eq!(snap.status(), NegotiationStatus::Cancelled);
    }

    fn agent_record(negotiation: NegotiationId, offer: OfferId, kind: DecisionKind) -> DecisionRecord {
        DecisionRecord {
            negotiation,
            offer,
            decision: kind,
            original_price: 700.0,
            recommended_price: None,
            nash_price: 830.0,
            confidence: 0.8,
            reasoning: "race".to_string(),
            market: MarketSnapshot {
                competing_count: 0,
                competing_min: None,
                competing_max: None,
                competing_avg: None,
                momentum: Momentum::Neutral,
                round: 2,
                execution_ms: 1,
            },
            guardrail_adjustment: None,
        }
    }

    async fn race(first: CommitAction, second: CommitAction) {
        let ledger = ledger_with_listing(1000.0).await;
        let receipt = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(1), 700.0, "")
            .await
            .unwrap();
        let (negotiation, offer) = (receipt.negotiation, receipt.offer.id);

        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|action| {
                let ledger = ledger.clone();
                let kind = match &action {
                    CommitAction::Accept => DecisionKind::Accept,
                    _ => DecisionKind::Counter,
                };
                let request = CommitRequest::new(negotiation, action)
                    .acting_on(offer)
                    .from_agent(agent_record(negotiation, offer, kind));
                tokio::spawn(async move { ledger.commit(request).await })
            })
            .collect();

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.into_iter().find_map(|r| r.err()).unwrap();
        assert_eq!(loser.class(), ErrorClass::Staleness, "{}", loser);
        assert_eq!(ledger.offer_count().await, 2);
        assert_eq!(ledger.decision_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_accept_and_counter_commit_once() {
        for _ in 0..20 {
            race(CommitAction::Accept, CommitAction::Counter { price: 800.0 }).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_counters_commit_once() {
        for _ in 0..20 {
            race(
                CommitAction::Counter { price: 800.0 },
                CommitAction::Counter { price: 820.0 },
            )
            .await;
        }
    }

    #[tokio::test]
    async fn test_rounds_strictly_increase_without_gaps() {
        let ledger = ledger_with_listing(1000.0).await;
        let mut receipt = ledger
            .submit_buyer_offer(ItemId(1), BuyerId(1), 500.0, "")
            .await
            .unwrap();
        let negotiation = receipt.negotiation;

        for step in 0..4 {
            let buyer_price = 500.0 + 50.0 * step as f64;
            ledger
                .commit(
                    CommitRequest::new(negotiation, CommitAction::Counter { price: buyer_price + 50.0 })
                        .acting_on(receipt.offer.id),
                )
                .await
                .unwrap();
            receipt = ledger
                .submit_buyer_offer(ItemId(1), BuyerId(1), buyer_price + 50.0, "")
                .await
                .unwrap();
        }

        let snap = ledger.snapshot(negotiation).await.unwrap();
        let rounds: Vec<u32> = snap.offers.iter().map(|o| o.round).collect();
        assert_eq!(rounds, (1..=9).collect::<Vec<u32>>());
    }
}
