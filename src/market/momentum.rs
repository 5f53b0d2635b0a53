//! Buyer price momentum

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of change across the buyer's last two offers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl Momentum {
    /// Classify from buyer prices in ledger order. Fewer than two prices is neutral.
    pub fn from_prices(prices: &[f64]) -> Self {
        match prices {
            [.., previous, last] if last > previous => Momentum::Positive,
            [.., previous, last] if last < previous => Momentum::Negative,
            _ => Momentum::Neutral,
        }
    }

    /// Premium applied when estimating how far the buyer will still go
    pub fn buyer_headroom(&self) -> f64 {
        match self {
            Momentum::Positive => 1.10,
            Momentum::Neutral => 1.05,
            Momentum::Negative => 1.02,
        }
    }
}

impl fmt::Display for Momentum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Momentum::Positive => "positive",
            Momentum::Negative => "negative",
            Momentum::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}
