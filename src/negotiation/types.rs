//! Negotiation ledger records and state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::Momentum;
use crate::types::{BuyerId, DecisionId, ItemId, NegotiationId, OfferId, SellerId, Side};

/// Negotiation state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    /// Offers are being exchanged
    Active,
    /// Buyer accepted the seller's counter, waiting for the seller to confirm
    DealPending,
    /// Deal closed at the final price
    Completed,
    /// Declined, expired or superseded by a sale to another buyer
    Cancelled,
    /// Item handed over; written by the pickup collaborator only
    PickedUp,
}

impl NegotiationStatus {
    /// Check if negotiation is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationStatus::Completed | NegotiationStatus::Cancelled | NegotiationStatus::PickedUp
        )
    }

    /// Check if negotiation is active
    pub fn is_active(&self) -> bool {
        matches!(self, NegotiationStatus::Active)
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationStatus::Active => "active",
            NegotiationStatus::DealPending => "deal_pending",
            NegotiationStatus::Completed => "completed",
            NegotiationStatus::Cancelled => "cancelled",
            NegotiationStatus::PickedUp => "picked_up",
        };
        write!(f, "{}", s)
    }
}

/// One buyer/seller/item negotiation thread
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: NegotiationId,
    pub item: ItemId,
    pub seller: SellerId,
    pub buyer: BuyerId,
    pub status: NegotiationStatus,
    pub max_rounds: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub final_price: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Negotiation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One immutable entry in a negotiation's history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub negotiation: NegotiationId,
    pub round: u32,
    pub side: Side,
    /// `None` for message-only entries
    pub price: Option<f64>,
    pub message: String,
    pub is_counter_offer: bool,
    pub from_agent: bool,
    pub decision: Option<DecisionId>,
    pub created_at: DateTime<Utc>,
}

/// The parts of a listing the negotiation core reads. Listing CRUD lives elsewhere.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Listing {
    pub id: ItemId,
    pub seller: SellerId,
    pub title: String,
    pub category: String,
    pub condition: String,
    pub listing_price: f64,
    /// Price the seller would take without haggling; defaults to the listing price
    pub target_price: Option<f64>,
    /// Time pressure in [0, 1]
    pub urgency: Option<f64>,
    pub agent_enabled: bool,
    pub listed_at: DateTime<Utc>,
    pub sold: bool,
    pub sold_at: Option<DateTime<Utc>>,
}

impl Listing {
    pub fn new(
        id: ItemId,
        seller: SellerId,
        title: impl Into<String>,
        category: impl Into<String>,
        condition: impl Into<String>,
        listing_price: f64,
    ) -> Self {
        Self {
            id,
            seller,
            title: title.into(),
            category: category.into(),
            condition: condition.into(),
            listing_price,
            target_price: None,
            urgency: None,
            agent_enabled: true,
            listed_at: Utc::now(),
            sold: false,
            sold_at: None,
        }
    }

    pub fn with_target_price(mut self, target: f64) -> Self {
        self.target_price = Some(target);
        self
    }

    pub fn with_urgency(mut self, urgency: f64) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn with_listed_at(mut self, listed_at: DateTime<Utc>) -> Self {
        self.listed_at = listed_at;
        self
    }

    pub fn days_on_market(&self, now: DateTime<Utc>) -> i64 {
        (now - self.listed_at).num_days().max(0)
    }
}

/// Negotiation action produced by the agent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionKind {
    Accept,
    Counter,
    Wait,
    Decline,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionKind::Accept => "ACCEPT",
            DecisionKind::Counter => "COUNTER",
            DecisionKind::Wait => "WAIT",
            DecisionKind::Decline => "DECLINE",
        };
        write!(f, "{}", s)
    }
}

/// Market context captured alongside a decision
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub competing_count: usize,
    pub competing_min: Option<f64>,
    pub competing_max: Option<f64>,
    pub competing_avg: Option<f64>,
    pub momentum: Momentum,
    pub round: u32,
    pub execution_ms: u64,
}

/// Audit data for one engine invocation, before the ledger assigns an id
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub negotiation: NegotiationId,
    pub offer: OfferId,
    pub decision: DecisionKind,
    pub original_price: f64,
    pub recommended_price: Option<f64>,
    pub nash_price: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub market: MarketSnapshot,
    pub guardrail_adjustment: Option<String>,
}

/// Persisted audit record of one engine invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentDecision {
    pub id: DecisionId,
    #[serde(flatten)]
    pub record: DecisionRecord,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(NegotiationStatus::Completed.is_terminal());
        assert!(NegotiationStatus::Cancelled.is_terminal());
        assert!(NegotiationStatus::PickedUp.is_terminal());
        assert!(!NegotiationStatus::Active.is_terminal());
        assert!(!NegotiationStatus::DealPending.is_terminal());

        assert!(NegotiationStatus::Active.is_active());
        assert!(!NegotiationStatus::DealPending.is_active());
    }

    #[test]
    fn test_status_serialization() {
        let serialized = serde_json::to_string(&NegotiationStatus::DealPending).unwrap();
        assert_eq!(serialized, "\"deal_pending\"");
        assert_eq!(NegotiationStatus::PickedUp.to_string(), "picked_up");
    }

    #[test]
    fn test_decision_kind_serialization() {
        let serialized = serde_json::to_string(&DecisionKind::Counter).unwrap();
        assert_eq!(serialized, "\"COUNTER\"");
        let kind: DecisionKind = serde_json::from_str("\"DECLINE\"").unwrap();
        assert_eq!(kind, DecisionKind::Decline);
    }

    #[test]
    fn test_listing_days_on_market() {
        let now = Utc::now();
        let listing = Listing::new(ItemId(1), SellerId(1), "Oak table", "dining_table", "good", 400.0)
            .with_listed_at(now - chrono::Duration::days(10));
        assert_eq!(listing.days_on_market(now), 10);

        let future = listing.clone().with_listed_at(now + chrono::Duration::days(1));
        assert_eq!(future.days_on_market(now), 0);
    }
}
