//! Context aggregation: everything the decision engine needs to know about
//! the market around one offer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::negotiation::{MarketSnapshot, NegotiationSnapshot};

use super::competition::{competing_offers, CompetingOffer, CompetitionStats};
use super::momentum::Momentum;
use super::valuation::{estimate_market_value, MarketValue};

/// Derived market context for one negotiation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketContext {
    pub momentum: Momentum,
    pub competing: Vec<CompetingOffer>,
    pub stats: CompetitionStats,
    pub market_value: MarketValue,
    /// Number of buyer price points the momentum was computed from
    pub buyer_offer_count: usize,
}

impl MarketContext {
    /// Build the context from a negotiation and its active siblings. Pure.
    pub fn aggregate(
        snapshot: &NegotiationSnapshot,
        siblings: &[NegotiationSnapshot],
        now: DateTime<Utc>,
    ) -> Self {
        let competing = competing_offers(siblings, now);
        let stats = CompetitionStats::from_offers(&competing);
        let buyer_prices = snapshot.buyer_prices();

        Self {
            momentum: Momentum::from_prices(&buyer_prices),
            competing,
            stats,
            market_value: estimate_market_value(&snapshot.listing, now),
            buyer_offer_count: buyer_prices.len(),
        }
    }

    pub fn competing_count(&self) -> usize {
        self.stats.count
    }

    /// Audit view of this context
    pub fn snapshot(&self, round: u32, execution_ms: u64) -> MarketSnapshot {
        MarketSnapshot {
            competing_count: self.stats.count,
            competing_min: self.stats.min,
            competing_max: self.stats.max,
            competing_avg: self.stats.mean,
            momentum: self.momentum,
            round,
            execution_ms,
        }
    }
}
