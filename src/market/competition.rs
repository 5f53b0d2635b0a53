//! Competing offers from sibling negotiations on the same item

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::negotiation::NegotiationSnapshot;
use crate::types::{BuyerHandle, Side};

/// One competing buyer offer, anonymized
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompetingOffer {
    pub price: f64,
    pub buyer: BuyerHandle,
    pub age_hours: f64,
}

/// Summary statistics over the competing offers
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitionStats {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

impl CompetitionStats {
    pub fn from_offers(offers: &[CompetingOffer]) -> Self {
        if offers.is_empty() {
            return Self::default();
        }

        let prices = offers.iter().map(|o| o.price);
        let min = prices.clone().fold(f64::INFINITY, f64::min);
        let max = prices.clone().fold(f64::NEG_INFINITY, f64::max);
        let mean = prices.sum::<f64>() / offers.len() as f64;

        Self {
            count: offers.len(),
            min: Some(min),
            max: Some(max),
            mean: Some(mean),
        }
    }
}

/// Latest priced buyer offer of every active sibling negotiation
pub fn competing_offers(siblings: &[NegotiationSnapshot], now: DateTime<Utc>) -> Vec<CompetingOffer> {
    siblings
        .iter()
        .filter(|s| s.status().is_active())
        .filter_map(|s| {
            let offer = s
                .offers
                .iter()
                .rev()
                .find(|o| o.side == Side::Buyer && o.price.is_some())?;
            let age = now - offer.created_at;
            Some(CompetingOffer {
                price: offer.price?,
                buyer: BuyerHandle::anonymize(s.negotiation.buyer),
                age_hours: (age.num_seconds().max(0) as f64) / 3600.0,
            })
        })
        .collect()
}
