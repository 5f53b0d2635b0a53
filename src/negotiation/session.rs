//! Read-only snapshot of one negotiation and its history

use serde::{Deserialize, Serialize};

use crate::types::{NegotiationId, Side};

use super::types::{Listing, Negotiation, NegotiationStatus, Offer};

/// A cloned, immutable view of a negotiation, its offers and its listing.
///
/// Everything upstream of the commit protocol works on these; none of them
/// hold a ledger lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NegotiationSnapshot {
    pub negotiation: Negotiation,
    pub listing: Listing,
    pub offers: Vec<Offer>,
}

impl NegotiationSnapshot {
    pub fn id(&self) -> NegotiationId {
        self.negotiation.id
    }

    pub fn status(&self) -> NegotiationStatus {
        self.negotiation.status
    }

    /// Round of the latest entry, 0 for an empty history
    pub fn current_round(&self) -> u32 {
        self.offers.last().map(|o| o.round).unwrap_or(0)
    }

    pub fn next_round(&self) -> u32 {
        self.current_round() + 1
    }

    pub fn latest_offer(&self) -> Option<&Offer> {
        self.offers.last()
    }

    pub fn latest_buyer_offer(&self) -> Option<&Offer> {
        self.offers.iter().rev().find(|o| o.side == Side::Buyer)
    }

    pub fn latest_seller_offer(&self) -> Option<&Offer> {
        self.offers.iter().rev().find(|o| o.side == Side::Seller)
    }

    /// Priced buyer offers in ledger order
    pub fn buyer_prices(&self) -> Vec<f64> {
        self.offers
            .iter()
            .filter(|o| o.side == Side::Buyer)
            .filter_map(|o| o.price)
            .collect()
    }

    /// Latest priced buyer offer
    pub fn latest_buyer_price(&self) -> Option<f64> {
        self.offers
            .iter()
            .rev()
            .filter(|o| o.side == Side::Buyer)
            .find_map(|o| o.price)
    }
}
