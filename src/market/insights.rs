//! Seller-facing summary of all offers on an item

use serde::{Deserialize, Serialize};

use crate::negotiation::{Listing, NegotiationSnapshot};
use crate::types::BuyerHandle;

/// Offers at or above this fraction of listing are priority
pub const PRIORITY_RATIO: f64 = 0.85;
/// Offers below this fraction of listing are lowball
pub const LOWBALL_RATIO: f64 = 0.70;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferCategory {
    Priority,
    Fair,
    Lowball,
}

impl OfferCategory {
    pub fn classify(price: f64, listing_price: f64) -> Self {
        let ratio = price / listing_price;
        if ratio >= PRIORITY_RATIO {
            OfferCategory::Priority
        } else if ratio >= LOWBALL_RATIO {
            OfferCategory::Fair
        } else {
            OfferCategory::Lowball
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    None,
    Low,
    Medium,
    High,
}

impl EngagementLevel {
    fn from_offer_count(count: usize) -> Self {
        match count {
            0 => EngagementLevel::None,
            n if n > 20 => EngagementLevel::High,
            n if n > 10 => EngagementLevel::Medium,
            _ => EngagementLevel::Low,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfferInsight {
    pub buyer: BuyerHandle,
    pub current_offer: f64,
    pub percentage_of_asking: u32,
    pub rounds: u32,
    pub category: OfferCategory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemInsights {
    pub priority: Vec<OfferInsight>,
    pub fair: Vec<OfferInsight>,
    pub lowball: Vec<OfferInsight>,
    pub average_offer_percentage: u32,
    pub engagement: EngagementLevel,
    pub total_offers: usize,
}

/// Categorize the current buyer offer of every active negotiation on an item
pub fn analyze(listing: &Listing, negotiations: &[NegotiationSnapshot]) -> ItemInsights {
    let mut insights = ItemInsights {
        priority: Vec::new(),
        fair: Vec::new(),
        lowball: Vec::new(),
        average_offer_percentage: 0,
        engagement: EngagementLevel::None,
        total_offers: 0,
    };

    let mut percentages = Vec::new();
    for snapshot in negotiations.iter().filter(|s| s.status().is_active()) {
        insights.total_offers += snapshot.buyer_prices().len();

        let Some(price) = snapshot.latest_buyer_price() else {
            continue;
        };
        let percentage = price / listing.listing_price * 100.0;
        percentages.push(percentage);

        let category = OfferCategory::classify(price, listing.listing_price);
        let insight = OfferInsight {
            buyer: BuyerHandle::anonymize(snapshot.negotiation.buyer),
            current_offer: price,
            percentage_of_asking: percentage.floor() as u32,
            rounds: snapshot.current_round(),
            category,
        };
        match category {
            OfferCategory::Priority => insights.priority.push(insight),
            OfferCategory::Fair => insights.fair.push(insight),
            OfferCategory::Lowball => insights.lowball.push(insight),
        }
    }

    if !percentages.is_empty() {
        let average = percentages.iter().sum::<f64>() / percentages.len() as f64;
        insights.average_offer_percentage = average.floor() as u32;
    }
    insights.engagement = EngagementLevel::from_offer_count(insights.total_offers);

    for bucket in [&mut insights.priority, &mut insights.fair, &mut insights.lowball] {
        bucket.sort_by(|a, b| b.current_offer.total_cmp(&a.current_offer));
    }

    insights
}
