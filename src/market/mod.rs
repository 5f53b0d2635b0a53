//! Market and competitive context around a negotiation

pub mod competition;
pub mod context;
pub mod insights;
pub mod momentum;
pub mod valuation;

pub use competition::{CompetingOffer, CompetitionStats};
pub use context::MarketContext;
pub use insights::{ItemInsights, OfferCategory};
pub use momentum::Momentum;
pub use valuation::{estimate_market_value, MarketValue};
