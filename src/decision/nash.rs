//! Alternating-offers reference price

use serde::{Deserialize, Serialize};

use crate::config::Aggressiveness;
use crate::market::Momentum;

/// Fixed buyer impatience
pub const BUYER_DISCOUNT: f64 = 0.90;
/// Seller discount factor of a seller with no time pressure
pub const BASE_SELLER_DISCOUNT: f64 = 0.95;
/// How much full urgency lowers the seller discount factor
pub const URGENCY_WEIGHT: f64 = 0.25;
pub const COMPETITION_BONUS_PER_OFFER: f64 = 0.02;
pub const MAX_COMPETITION_BONUS: f64 = 0.10;

/// Reference price and the inputs it was computed from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NashEstimate {
    pub price: f64,
    pub seller_discount: f64,
    pub buyer_discount: f64,
    pub buyer_max: f64,
    pub competition_bonus: f64,
    /// Agreement between the market value and the buyer's implied maximum
    pub confidence: f64,
}

pub fn seller_discount(urgency: f64, aggressiveness: Aggressiveness) -> f64 {
    (BASE_SELLER_DISCOUNT - URGENCY_WEIGHT * urgency + aggressiveness.patience_shift())
        .clamp(0.5, 0.99)
}

/// Highest price the buyer has shown, stretched by their momentum
pub fn implied_buyer_max(buyer_prices: &[f64], offer: f64, momentum: Momentum) -> f64 {
    let highest = buyer_prices.iter().copied().fold(offer, f64::max);
    highest * momentum.buyer_headroom()
}

pub fn competition_bonus(competing: usize) -> f64 {
    (COMPETITION_BONUS_PER_OFFER * competing as f64).min(MAX_COMPETITION_BONUS)
}

/// 1 minus the relative gap between the two estimates
pub fn agreement(market_value: f64, buyer_max: f64) -> f64 {
    let scale = market_value.max(buyer_max);
    if scale <= 0.0 {
        return 0.0;
    }
    (1.0 - (market_value - buyer_max).abs() / scale).clamp(0.0, 1.0)
}

/// Inputs for [`estimate`]
#[derive(Clone, Debug)]
pub struct NashInputs {
    pub target: f64,
    pub listing: f64,
    pub buyer_max: f64,
    pub market_value: f64,
    pub urgency: f64,
    pub aggressiveness: Aggressiveness,
    pub competing: usize,
}

/// Rubinstein-style reference price.
///
/// `(target + δb·buyerMax) / (1 − δs·δb)` is mapped back into the price range
/// with `(1 − δs·δb) / (1 + δb)` and discounted once by `δs`, so a patient seller
/// holds out for more. The competition bonus widens it and the listing price
/// caps it.
pub fn estimate(inputs: &NashInputs) -> NashEstimate {
    let ds = seller_discount(inputs.urgency, inputs.aggressiveness);
    let db = BUYER_DISCOUNT;

    let raw = (inputs.target + db * inputs.buyer_max) / (1.0 - ds * db);
    let normalized = raw * (1.0 - ds * db) / (1.0 + db) * ds;

    let bonus = competition_bonus(inputs.competing);
    let price = (normalized * (1.0 + bonus)).min(inputs.listing);

    NashEstimate {
        price,
        seller_discount: ds,
        buyer_discount: db,
        buyer_max: inputs.buyer_max,
        competition_bonus: bonus,
        confidence: agreement(inputs.market_value, inputs.buyer_max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> NashInputs {
        NashInputs {
            target: 1000.0,
            listing: 1000.0,
            buyer_max: 840.0,
            market_value: 850.0,
            urgency: 0.0,
            aggressiveness: Aggressiveness::Moderate,
            competing: 0,
        }
    }

    #[test]
    fn test_seller_discount() {
        assert!((seller_discount(0.0, Aggressiveness::Moderate) - 0.95).abs() < 1e-9);
        assert!((seller_discount(1.0, Aggressiveness::Moderate) - 0.70).abs() < 1e-9);
        assert!(
            seller_discount(0.5, Aggressiveness::Aggressive)
                > seller_discount(0.5, Aggressiveness::Passive)
        );
    }

    #[test]
    fn test_implied_buyer_max() {
        let max = implied_buyer_max(&[600.0, 650.0], 650.0, Momentum::Positive);
        assert!((max - 715.0).abs() < 1e-9);

        let max = implied_buyer_max(&[700.0, 650.0], 650.0, Momentum::Negative);
        assert!((max - 714.0).abs() < 1e-9);
    }

    #[test]
    fn test_competition_bonus_is_capped() {
        assert_eq!(competition_bonus(0), 0.0);
        assert!((competition_bonus(2) - 0.04).abs() < 1e-9);
        assert_eq!(competition_bonus(9), MAX_COMPETITION_BONUS);
    }

    #[test]
    fn test_estimate() {
        let estimate = estimate(&inputs());
        // (1000 + 0.9 * 840) / 1.9 * 0.95
        assert!((estimate.price - 878.0).abs() < 1e-9);
        assert!(estimate.price <= 1000.0);
        assert!(estimate.confidence > 0.98);
    }

    #[test]
    fn test_estimate_monotonic_in_urgency() {
        let relaxed = estimate(&inputs());
        let urgent = estimate(&NashInputs {
            urgency: 0.8,
            ..inputs()
        });
        assert!(urgent.price < relaxed.price);
    }

    #[test]
    fn test_estimate_clamped_to_listing() {
        let estimate = estimate(&NashInputs {
            target: 1000.0,
            listing: 900.0,
            buyer_max: 1000.0,
            competing: 5,
            ..inputs()
        });
        assert_eq!(estimate.price, 900.0);
    }

    #[test]
    fn test_agreement() {
        assert_eq!(agreement(800.0, 800.0), 1.0);
        assert!((agreement(1000.0, 500.0) - 0.5).abs() < 1e-9);
        assert_eq!(agreement(0.0, 0.0), 0.0);
    }
}
