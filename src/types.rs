//! Core types used throughout the negotiation agent

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AgentError, Result};

/// Counter prices are always a multiple of this many currency units.
pub const PRICE_UNIT: f64 = 5.0;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of one buyer/seller/item negotiation thread
    NegotiationId,
    "neg"
);
numeric_id!(
    /// Identifier of one ledger entry
    OfferId,
    "offer"
);
numeric_id!(
    /// Identifier of one engine invocation audit record
    DecisionId,
    "decision"
);
numeric_id!(
    /// Identifier of a processing-queue row
    TaskId,
    "task"
);
numeric_id!(ItemId, "item");
numeric_id!(SellerId, "seller");
numeric_id!(BuyerId, "buyer");

/// Which party wrote a ledger entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buyer,
    Seller,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buyer => write!(f, "buyer"),
            Side::Seller => write!(f, "seller"),
        }
    }
}

/// Anonymized buyer handle shown to other parties (derived from a hash of the buyer id)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuyerHandle(pub String);

impl BuyerHandle {
    /// Derive a stable handle from a buyer id
    pub fn anonymize(buyer: BuyerId) -> Self {
        let mut hasher = Blake2b512::new();
        hasher.update(b"buyer-handle");
        hasher.update(buyer.0.to_be_bytes());
        let result = hasher.finalize();
        Self(format!("buyer_{}", hex::encode(&result[..4])))
    }
}

impl fmt::Display for BuyerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round a price to the nearest [`PRICE_UNIT`]
pub fn round_to_unit(price: f64) -> f64 {
    ((price / PRICE_UNIT).round() * PRICE_UNIT).max(0.0)
}

/// Largest unit multiple that is `<= price`
pub fn floor_to_unit(price: f64) -> f64 {
    ((price / PRICE_UNIT).floor() * PRICE_UNIT).max(0.0)
}

/// Smallest unit multiple strictly greater than `price`
pub fn next_unit_above(price: f64) -> f64 {
    let candidate = (price / PRICE_UNIT).ceil() * PRICE_UNIT;
    if candidate > price {
        candidate
    } else {
        candidate + PRICE_UNIT
    }
}

/// True if `price` sits on the unit grid
pub fn is_unit_multiple(price: f64) -> bool {
    let units = price / PRICE_UNIT;
    (units - units.round()).abs() < 1e-9
}

/// Reject NaN, infinite, zero and negative prices
pub fn validate_price(price: f64, what: &str) -> Result<f64> {
    if !price.is_finite() || price <= 0.0 {
        return Err(AgentError::InvalidPrice(format!("{} must be positive, got {}", what, price)));
    }
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(NegotiationId(7).to_string(), "neg_7");
        assert_eq!(OfferId(12).to_string(), "offer_12");
        assert_eq!(TaskId(3).to_string(), "task_3");
    }

    #[test]
    fn test_buyer_handle_is_stable_and_distinct() {
        let a = BuyerHandle::anonymize(BuyerId(1));
        let b = BuyerHandle::anonymize(BuyerId(2));

        assert_eq!(a, BuyerHandle::anonymize(BuyerId(1)));
        assert_ne!(a, b);
        assert!(a.0.starts_with("buyer_"));
        assert_eq!(a.0.len(), "buyer_".len() + 8);
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_to_unit(221.4), 220.0);
        assert_eq!(round_to_unit(222.5), 225.0);
        assert_eq!(floor_to_unit(249.0), 245.0);
        assert_eq!(next_unit_above(205.0), 210.0);
        assert_eq!(next_unit_above(206.0), 210.0);
        assert!(is_unit_multiple(310.0));
        assert!(!is_unit_multiple(312.0));
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price(10.0, "offer").is_ok());
        assert!(validate_price(0.0, "offer").is_err());
        assert!(validate_price(-3.0, "offer").is_err());
        assert!(validate_price(f64::NAN, "offer").is_err());
    }

    #[test]
    fn test_side_serialization() {
        let serialized = serde_json::to_string(&Side::Seller).unwrap();
        assert_eq!(serialized, "\"seller\"");
        let side: Side = serde_json::from_str("\"buyer\"").unwrap();
        assert_eq!(side, Side::Buyer);
    }
}
