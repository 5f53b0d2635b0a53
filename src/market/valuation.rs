//! Coarse second-hand market value estimate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::negotiation::Listing;

/// Floor for the days-on-market decay
const MIN_STALENESS: f64 = 0.85;

/// How much of its asking price a category typically fetches second hand
pub fn category_retention(category: &str) -> f64 {
    match category.trim().to_ascii_lowercase().as_str() {
        "electronics" | "phone" | "laptop" => 0.80,
        "couch" | "sofa" => 0.88,
        "dining_table" | "table" => 0.90,
        "bookshelf" | "shelf" => 0.86,
        "chair" => 0.87,
        "dresser" => 0.90,
        "furniture" => 0.88,
        "collectible" | "antique" | "vintage" => 0.97,
        "bike" | "bicycle" => 0.92,
        _ => 0.90,
    }
}

pub fn condition_factor(condition: &str) -> f64 {
    match condition.trim().to_ascii_lowercase().as_str() {
        "new" => 1.0,
        "like_new" | "like new" | "excellent" => 0.97,
        "good" => 0.93,
        "used" => 0.90,
        "fair" => 0.82,
        "poor" => 0.70,
        _ => 0.90,
    }
}

/// 1% per full week on market after the first week, floored at 85%
pub fn staleness_factor(days_on_market: i64) -> f64 {
    let weeks = (days_on_market.max(0) - 7).max(0) / 7;
    (1.0 - 0.01 * weeks as f64).max(MIN_STALENESS)
}

/// Market value estimate and the factors behind it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketValue {
    pub value: f64,
    pub retention: f64,
    pub condition: f64,
    pub staleness: f64,
    pub days_on_market: i64,
}

pub fn estimate_market_value(listing: &Listing, now: DateTime<Utc>) -> MarketValue {
    let retention = category_retention(&listing.category);
    let condition = condition_factor(&listing.condition);
    let days_on_market = listing.days_on_market(now);
    let staleness = staleness_factor(days_on_market);

    MarketValue {
        value: listing.listing_price * retention * condition * staleness,
        retention,
        condition,
        staleness,
        days_on_market,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, SellerId};

    #[test]
    fn test_staleness_decay() {
        assert_eq!(staleness_factor(0), 1.0);
        assert_eq!(staleness_factor(13), 1.0);
        assert!((staleness_factor(14) - 0.99).abs() < 1e-9);
        assert!((staleness_factor(35) - 0.96).abs() < 1e-9);
        assert_eq!(staleness_factor(1000), MIN_STALENESS);
    }

    #[test]
    fn test_unknown_category_and_condition_use_defaults() {
        assert_eq!(category_retention("spaceship"), 0.90);
        assert_eq!(condition_factor("mysterious"), 0.90);
        assert_eq!(condition_factor(" Excellent "), 0.97);
    }

    #[test]
    fn test_market_value() {
        let now = Utc::now();
        let listing = Listing::new(ItemId(1), SellerId(1), "Dresser", "dresser", "new", 1000.0)
            .with_listed_at(now);
        let value = estimate_market_value(&listing, now);
        assert!((value.value - 900.0).abs() < 1e-9);
        assert_eq!(value.days_on_market, 0);
    }
}
