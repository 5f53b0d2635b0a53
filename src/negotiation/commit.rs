//! Commit protocol: the only code path that writes negotiation state.
//!
//! Every transition is validated against the freshest ledger state and applied
//! inside a single write-lock critical section held by [`super::Ledger`].
//! All preconditions are checked before the first mutation, so a rejected
//! commit leaves the ledger untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BuyerId, DecisionId, ItemId, NegotiationId, OfferId, Side};

use super::ledger::{LedgerSettings, LedgerState};
use super::types::{
    AgentDecision, DecisionRecord, Listing, Negotiation, NegotiationStatus, Offer,
};

/// Seller-side prices may not exceed this multiple of the listing price
pub const SELLER_MAX_LISTING_RATIO: f64 = 1.25;
/// Counters may not exceed this multiple of the buyer's latest price
pub const COUNTER_MAX_OVER_BUYER: f64 = 1.20;
/// Buyer offers must lie within this fraction range of the listing price
pub const BUYER_MIN_LISTING_RATIO: f64 = 0.10;
pub const BUYER_MAX_LISTING_RATIO: f64 = 1.0;

const EPSILON: f64 = 1e-9;

/// Typed reasons a commit was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitRejection {
    #[error("negotiation {0} not found")]
    NegotiationNotFound(NegotiationId),

    #[error("listing {0} not found")]
    ListingNotFound(ItemId),

    #[error("negotiation {negotiation} is {status}, expected {expected}")]
    WrongStatus {
        negotiation: NegotiationId,
        status: NegotiationStatus,
        expected: NegotiationStatus,
    },

    #[error("negotiation {0} has expired")]
    Expired(NegotiationId),

    #[error("stale offer on {negotiation}: acted on {acted_on}, latest is {latest:?}")]
    StaleOffer {
        negotiation: NegotiationId,
        acted_on: OfferId,
        latest: Option<OfferId>,
    },

    #[error("turn violation on {negotiation}: {side} entry cannot follow a {last} entry")]
    TurnViolation {
        negotiation: NegotiationId,
        side: Side,
        last: Side,
    },

    #[error("price {price} outside [{min}, {max}]")]
    PriceOutOfBounds { price: f64, min: f64, max: f64 },

    #[error("invalid price {0}")]
    InvalidPrice(f64),

    #[error("{0} is already sold")]
    ItemSold(ItemId),

    #[error("nothing to accept on {0}")]
    NothingToAccept(NegotiationId),

    #[error("decision record belongs to {found}, not {expected}")]
    DecisionMismatch {
        expected: NegotiationId,
        found: NegotiationId,
    },
}

impl CommitRejection {
    /// Rejections caused by the negotiation moving on since the caller read it
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            CommitRejection::StaleOffer { .. }
                | CommitRejection::WrongStatus { .. }
                | CommitRejection::Expired(_)
                | CommitRejection::TurnViolation { .. }
                | CommitRejection::ItemSold(_)
        )
    }
}

/// The state transition a caller asks for
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommitAction {
    /// Seller accepts the buyer's latest offer
    Accept,
    /// Seller counters at a price
    Counter { price: f64 },
    /// Seller holds without a price
    Wait,
    /// Seller ends the negotiation
    Decline,
    /// Buyer submits or replaces an offer
    BuyerOffer { price: f64 },
    /// Buyer takes the seller's latest counter
    BuyerAcceptCounter,
    /// Seller confirms a pending deal
    ConfirmDeal,
}

impl CommitAction {
    pub fn side(&self) -> Side {
        match self {
            CommitAction::BuyerOffer { .. } | CommitAction::BuyerAcceptCounter => Side::Buyer,
            _ => Side::Seller,
        }
    }

    fn required_status(&self) -> NegotiationStatus {
        match self {
            CommitAction::ConfirmDeal => NegotiationStatus::DealPending,
            _ => NegotiationStatus::Active,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommitAction::Accept => "accept",
            CommitAction::Counter { .. } => "counter",
            CommitAction::Wait => "wait",
            CommitAction::Decline => "decline",
            CommitAction::BuyerOffer { .. } => "buyer_offer",
            CommitAction::BuyerAcceptCounter => "buyer_accept_counter",
            CommitAction::ConfirmDeal => "confirm_deal",
        }
    }
}

/// A proposed ledger write
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitRequest {
    pub negotiation: NegotiationId,
    pub action: CommitAction,
    /// The entry this action responds to; must still be current at commit time
    pub acting_on: Option<OfferId>,
    pub message: String,
    pub from_agent: bool,
    pub decision: Option<DecisionRecord>,
}

impl CommitRequest {
    pub fn new(negotiation: NegotiationId, action: CommitAction) -> Self {
        Self {
            negotiation,
            action,
            acting_on: None,
            message: String::new(),
            from_agent: false,
            decision: None,
        }
    }

    pub fn acting_on(mut self, offer: OfferId) -> Self {
        self.acting_on = Some(offer);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Mark the entry as agent-written and attach its audit record
    pub fn from_agent(mut self, decision: DecisionRecord) -> Self {
        self.from_agent = true;
        self.decision = Some(decision);
        self
    }
}

/// What a successful commit wrote
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub negotiation: NegotiationId,
    pub offer: Offer,
    pub status: NegotiationStatus,
    pub decision: Option<DecisionId>,
    pub opened: bool,
    pub cancelled_siblings: Vec<NegotiationId>,
}

fn check_price(price: f64) -> Result<f64, CommitRejection> {
    if !price.is_finite() || price <= 0.0 {
        return Err(CommitRejection::InvalidPrice(price));
    }
    Ok(price)
}

fn check_bounds(price: f64, min: f64, max: f64) -> Result<(), CommitRejection> {
    if price < min - EPSILON || price > max + EPSILON {
        return Err(CommitRejection::PriceOutOfBounds { price, min, max });
    }
    Ok(())
}

/// Buyer offers must lie within [10%, 100%] of the listing price
pub fn check_buyer_price(price: f64, listing_price: f64) -> Result<(), CommitRejection> {
    check_price(price)?;
    check_bounds(
        price,
        listing_price * BUYER_MIN_LISTING_RATIO,
        listing_price * BUYER_MAX_LISTING_RATIO,
    )
}

/// Counters must beat the buyer's latest price by at most 20%, and stay
/// under the seller ceiling
pub fn check_counter_price(
    price: f64,
    buyer_price: f64,
    listing_price: f64,
) -> Result<(), CommitRejection> {
    check_price(price)?;
    check_seller_price(price, listing_price)?;
    if price <= buyer_price + EPSILON {
        return Err(CommitRejection::PriceOutOfBounds {
            price,
            min: buyer_price,
            max: buyer_price * COUNTER_MAX_OVER_BUYER,
        });
    }
    check_bounds(price, buyer_price, buyer_price * COUNTER_MAX_OVER_BUYER)
}

fn check_seller_price(price: f64, listing_price: f64) -> Result<(), CommitRejection> {
    check_bounds(price, 0.0, listing_price * SELLER_MAX_LISTING_RATIO)
}

fn next_round(offers: &[Offer]) -> u32 {
    offers.last().map(|o| o.round + 1).unwrap_or(1)
}

/// Validate and apply one transition on an existing negotiation
pub(crate) fn apply(
    state: &mut LedgerState,
    request: CommitRequest,
    now: DateTime<Utc>,
) -> Result<CommitReceipt, CommitRejection> {
    let negotiation = state
        .negotiations
        .get(&request.negotiation)
        .ok_or(CommitRejection::NegotiationNotFound(request.negotiation))?;
    let listing = state
        .listings
        .get(&negotiation.item)
        .ok_or(CommitRejection::ListingNotFound(negotiation.item))?;
    let offers = state
        .offers
        .get(&request.negotiation)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    // Status
    let expected = request.action.required_status();
    if negotiation.status != expected {
        return Err(CommitRejection::WrongStatus {
            negotiation: negotiation.id,
            status: negotiation.status,
            expected,
        });
    }
    if negotiation.status.is_active() && negotiation.is_expired(now) {
        return Err(CommitRejection::Expired(negotiation.id));
    }

    if let Some(record) = &request.decision {
        if record.negotiation != negotiation.id {
            return Err(CommitRejection::DecisionMismatch {
                expected: negotiation.id,
                found: record.negotiation,
            });
        }
    }

    // Freshness
    let side = request.action.side();
    let latest_buyer = offers.iter().rev().find(|o| o.side == Side::Buyer);
    let latest_seller = offers.iter().rev().find(|o| o.side == Side::Seller);
    if let Some(acted_on) = request.acting_on {
        let latest = match request.action {
            CommitAction::BuyerAcceptCounter => latest_seller,
            _ => latest_buyer,
        };
        if latest.map(|o| o.id) != Some(acted_on) {
            return Err(CommitRejection::StaleOffer {
                negotiation: negotiation.id,
                acted_on,
                latest: latest.map(|o| o.id),
            });
        }
    }

    // Turn ownership: only a buyer may follow their own entry
    if let Some(last) = offers.last() {
        if last.side == Side::Seller && side == Side::Seller {
            return Err(CommitRejection::TurnViolation {
                negotiation: negotiation.id,
                side,
                last: last.side,
            });
        }
    }

    if listing.sold
        && matches!(
            request.action,
            CommitAction::Accept | CommitAction::ConfirmDeal | CommitAction::BuyerOffer { .. }
        )
    {
        return Err(CommitRejection::ItemSold(listing.id));
    }

    // Price and resulting state
    let buyer_price = latest_buyer.and_then(|o| o.price);
    let (price, status, is_counter) = match &request.action {
        CommitAction::Accept => {
            let price = buyer_price.ok_or(CommitRejection::NothingToAccept(negotiation.id))?;
            check_seller_price(price, listing.listing_price)?;
            (Some(price), NegotiationStatus::Completed, false)
        }
        CommitAction::Counter { price } => {
            let buyer_price =
                buyer_price.ok_or(CommitRejection::NothingToAccept(negotiation.id))?;
            check_counter_price(*price, buyer_price, listing.listing_price)?;
            (Some(*price), NegotiationStatus::Active, true)
        }
        CommitAction::Wait => (None, NegotiationStatus::Active, false),
        CommitAction::Decline => (None, NegotiationStatus::Cancelled, false),
        CommitAction::BuyerOffer { price } => {
            check_buyer_price(*price, listing.listing_price)?;
            (Some(*price), NegotiationStatus::Active, offers.iter().any(|o| o.side == Side::Seller))
        }
        CommitAction::BuyerAcceptCounter => {
            let last = offers.last().filter(|o| o.side == Side::Seller && o.price.is_some());
            let price = last
                .and_then(|o| o.price)
                .ok_or(CommitRejection::NothingToAccept(negotiation.id))?;
            (Some(price), NegotiationStatus::DealPending, false)
        }
        CommitAction::ConfirmDeal => {
            let price = negotiation
                .final_price
                .ok_or(CommitRejection::NothingToAccept(negotiation.id))?;
            (Some(price), NegotiationStatus::Completed, false)
        }
    };

    // Every check passed; from here on we only write.
    let item = negotiation.item;
    let round = next_round(offers);
    let negotiation_id = negotiation.id;

    let decision_id = request.decision.map(|record| {
        let id = state.allocate_decision_id();
        state.decisions.push(AgentDecision {
            id,
            record,
            created_at: now,
        });
        id
    });

    let offer = Offer {
        id: state.allocate_offer_id(),
        negotiation: negotiation_id,
        round,
        side,
        price,
        message: request.message,
        is_counter_offer: is_counter,
        from_agent: request.from_agent,
        decision: decision_id,
        created_at: now,
    };
    state
        .offers
        .entry(negotiation_id)
        .or_default()
        .push(offer.clone());

    let mut cancelled_siblings = Vec::new();
    if let Some(negotiation) = state.negotiations.get_mut(&negotiation_id) {
        negotiation.status = status;
        match status {
            NegotiationStatus::Completed => {
                negotiation.final_price = price;
                negotiation.completed_at = Some(now);
            }
            NegotiationStatus::DealPending => {
                negotiation.final_price = price;
            }
            _ => {}
        }
    }
    if status == NegotiationStatus::Completed {
        if let Some(listing) = state.listings.get_mut(&item) {
            listing.sold = true;
            listing.sold_at = Some(now);
        }
        cancelled_siblings = cancel_siblings(state, item, negotiation_id, now);
    }

    Ok(CommitReceipt {
        negotiation: negotiation_id,
        offer,
        status,
        decision: decision_id,
        opened: false,
        cancelled_siblings,
    })
}

/// Cancel every other open negotiation on a sold item, leaving a system
/// message in each. These entries are exempt from turn ordering.
fn cancel_siblings(
    state: &mut LedgerState,
    item: ItemId,
    winner: NegotiationId,
    now: DateTime<Utc>,
) -> Vec<NegotiationId> {
    let siblings: Vec<(NegotiationId, NegotiationStatus)> = state
        .negotiations
        .values()
        .filter(|n| n.item == item && n.id != winner)
        .filter(|n| {
            matches!(
                n.status,
                NegotiationStatus::Active | NegotiationStatus::DealPending
            )
        })
        .map(|n| (n.id, n.status))
        .collect();

    for (id, previous) in &siblings {
        let message = if *previous == NegotiationStatus::DealPending {
            "Sorry, this item has been sold to another buyer. Your pending deal has been cancelled."
        } else {
            "This item has been sold to another buyer. Thank you for your interest!"
        };
        let round = state.offers.get(id).map(|o| next_round(o)).unwrap_or(1);
        let offer = Offer {
            id: state.allocate_offer_id(),
            negotiation: *id,
            round,
            side: Side::Seller,
            price: None,
            message: message.to_string(),
            is_counter_offer: false,
            from_agent: true,
            decision: None,
            created_at: now,
        };
        state.offers.entry(*id).or_default().push(offer);
        if let Some(negotiation) = state.negotiations.get_mut(id) {
            negotiation.status = NegotiationStatus::Cancelled;
        }
    }

    if !siblings.is_empty() {
        tracing::info!(
            item = %item,
            cancelled = siblings.len(),
            "Cancelled competing negotiations after sale"
        );
    }

    siblings.into_iter().map(|(id, _)| id).collect()
}

/// Open a negotiation with the buyer's first offer. Validated before any write.
pub(crate) fn open(
    state: &mut LedgerState,
    item: ItemId,
    buyer: BuyerId,
    price: f64,
    message: String,
    settings: &LedgerSettings,
    now: DateTime<Utc>,
) -> Result<CommitReceipt, CommitRejection> {
    let listing: &Listing = state
        .listings
        .get(&item)
        .ok_or(CommitRejection::ListingNotFound(item))?;
    if listing.sold {
        return Err(CommitRejection::ItemSold(item));
    }
    check_buyer_price(price, listing.listing_price)?;
    let seller = listing.seller;

    let id = state.allocate_negotiation_id();
    state.negotiations.insert(
        id,
        Negotiation {
            id,
            item,
            seller,
            buyer,
            status: NegotiationStatus::Active,
            max_rounds: settings.max_rounds,
            created_at: now,
            expires_at: now + settings.ttl,
            final_price: None,
            completed_at: None,
        },
    );

    let offer = Offer {
        id: state.allocate_offer_id(),
        negotiation: id,
        round: 1,
        side: Side::Buyer,
        price: Some(price),
        message,
        is_counter_offer: false,
        from_agent: false,
        decision: None,
        created_at: now,
    };
    state.offers.insert(id, vec![offer.clone()]);

    Ok(CommitReceipt {
        negotiation: id,
        offer,
        status: NegotiationStatus::Active,
        decision: None,
        opened: true,
        cancelled_siblings: Vec::new(),
    })
}

/// Cancel an active negotiation whose expiry has passed
pub(crate) fn expire(
    state: &mut LedgerState,
    negotiation: NegotiationId,
    now: DateTime<Utc>,
) -> Result<CommitReceipt, CommitRejection> {
    let current = state
        .negotiations
        .get(&negotiation)
        .ok_or(CommitRejection::NegotiationNotFound(negotiation))?;
    if !current.status.is_active() {
        return Err(CommitRejection::WrongStatus {
            negotiation,
            status: current.status,
            expected: NegotiationStatus::Active,
        });
    }
    if !current.is_expired(now) {
        return Err(CommitRejection::WrongStatus {
            negotiation,
            status: current.status,
            expected: NegotiationStatus::Cancelled,
        });
    }

    let round = state
        .offers
        .get(&negotiation)
        .map(|o| next_round(o))
        .unwrap_or(1);
    let offer = Offer {
        id: state.allocate_offer_id(),
        negotiation,
        round,
        side: Side::Seller,
        price: None,
        message: "This negotiation has expired.".to_string(),
        is_counter_offer: false,
        from_agent: true,
        decision: None,
        created_at: now,
    };
    state.offers.entry(negotiation).or_default().push(offer.clone());
    if let Some(n) = state.negotiations.get_mut(&negotiation) {
        n.status = NegotiationStatus::Cancelled;
    }

    Ok(CommitReceipt {
        negotiation,
        offer,
        status: NegotiationStatus::Cancelled,
        decision: None,
        opened: false,
        cancelled_siblings: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buyer_price_bounds() {
        assert!(check_buyer_price(500.0, 1000.0).is_ok());
        assert!(check_buyer_price(100.0, 1000.0).is_ok());
        assert!(check_buyer_price(1000.0, 1000.0).is_ok());
        assert!(check_buyer_price(99.0, 1000.0).is_err());
        assert!(check_buyer_price(1001.0, 1000.0).is_err());
        assert_eq!(
            check_buyer_price(-1.0, 1000.0),
            Err(CommitRejection::InvalidPrice(-1.0))
        );
    }

    #[test]
    fn test_counter_price_bounds() {
        assert!(check_counter_price(240.0, 200.0, 1000.0).is_ok());
        assert!(check_counter_price(245.0, 200.0, 1000.0).is_err());
        assert!(check_counter_price(200.0, 200.0, 1000.0).is_err());
        assert!(check_counter_price(195.0, 200.0, 1000.0).is_err());
        // Seller ceiling applies even when the buyer is above listing
        assert!(check_counter_price(1300.0, 1100.0, 1000.0).is_err());
    }

    #[test]
    fn test_action_sides() {
        assert_eq!(CommitAction::Accept.side(), Side::Seller);
        assert_eq!(CommitAction::Counter { price: 10.0 }.side(), Side::Seller);
        assert_eq!(CommitAction::BuyerOffer { price: 10.0 }.side(), Side::Buyer);
        assert_eq!(CommitAction::BuyerAcceptCounter.side(), Side::Buyer);
        assert_eq!(CommitAction::ConfirmDeal.side(), Side::Seller);
    }

    #[test]
    fn test_stale_classification() {
        let stale = CommitRejection::StaleOffer {
            negotiation: NegotiationId(1),
            acted_on: OfferId(1),
            latest: Some(OfferId(3)),
        };
        assert!(stale.is_stale());
        assert!(!CommitRejection::InvalidPrice(0.0).is_stale());
    }

    #[test]
    fn test_request_builder() {
        let request = CommitRequest::new(NegotiationId(4), CommitAction::Wait)
            .acting_on(OfferId(9))
            .with_message("Let me think about it");
        assert_eq!(request.acting_on, Some(OfferId(9)));
        assert!(!request.from_agent);
        assert_eq!(request.action.name(), "wait");
    }
}
