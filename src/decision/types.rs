//! Decision engine inputs and outputs

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SellerAgentConfiguration;
use crate::error::{AgentError, Result};
use crate::market::MarketContext;
use crate::negotiation::{DecisionKind, NegotiationSnapshot};
use crate::types::validate_price;

use super::nash::NashEstimate;

/// Urgency assumed when the listing does not carry one
pub const DEFAULT_URGENCY: f64 = 0.5;
/// Confidence penalty per defaulted input
pub const DEFAULT_INPUT_PENALTY: f64 = 0.9;

/// Which rule of the cascade produced a decision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    Target,
    Competition,
    MaxRounds,
    Nash,
    MarketFallback,
}

impl DecisionRule {
    /// Rules whose decision is final and skips the urgency adjustment
    pub fn is_final(&self) -> bool {
        matches!(self, DecisionRule::Target | DecisionRule::MaxRounds)
    }
}

impl fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionRule::Target => "target",
            DecisionRule::Competition => "competition",
            DecisionRule::MaxRounds => "max_rounds",
            DecisionRule::Nash => "nash",
            DecisionRule::MarketFallback => "market_fallback",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutcome {
    DealClosed,
    BuyerResponds,
    AwaitingBetterOffer,
    NegotiationEnds,
}

impl From<DecisionKind> for ExpectedOutcome {
    fn from(kind: DecisionKind) -> Self {
        match kind {
            DecisionKind::Accept => ExpectedOutcome::DealClosed,
            DecisionKind::Counter => ExpectedOutcome::BuyerResponds,
            DecisionKind::Wait => ExpectedOutcome::AwaitingBetterOffer,
            DecisionKind::Decline => ExpectedOutcome::NegotiationEnds,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn assess(kind: DecisionKind, confidence: f64) -> Self {
        match kind {
            _ if confidence < 0.5 => RiskLevel::High,
            DecisionKind::Accept if confidence >= 0.8 => RiskLevel::Low,
            DecisionKind::Decline => RiskLevel::High,
            _ => RiskLevel::Medium,
        }
    }
}

/// What one rule proposes
#[derive(Clone, Debug, PartialEq)]
pub struct Proposal {
    pub decision: DecisionKind,
    pub counter_price: Option<f64>,
    pub reasoning: String,
    pub confidence: f64,
    pub rule: DecisionRule,
}

impl Proposal {
    pub fn new(
        rule: DecisionRule,
        decision: DecisionKind,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            decision,
            counter_price: None,
            reasoning: reasoning.into(),
            confidence,
            rule,
        }
    }

    pub fn counter(rule: DecisionRule, price: f64, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            counter_price: Some(price),
            ..Self::new(rule, DecisionKind::Counter, confidence, reasoning)
        }
    }
}

/// Engine output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub decision: DecisionKind,
    pub counter_price: Option<f64>,
    pub reasoning: String,
    pub confidence: f64,
    pub nash_equilibrium_price: f64,
    pub expected_outcome: ExpectedOutcome,
    pub risk_level: RiskLevel,
    pub rule: DecisionRule,
}

/// Everything the engine reads for one offer
#[derive(Clone, Debug)]
pub struct DecisionInput {
    pub offer_price: f64,
    /// Priced buyer offers in ledger order, including the current one
    pub buyer_prices: Vec<f64>,
    pub listing_price: f64,
    pub target_price: Option<f64>,
    pub urgency: Option<f64>,
    pub round: u32,
    pub max_rounds: u32,
    pub config: SellerAgentConfiguration,
    pub context: MarketContext,
}

impl DecisionInput {
    /// Build the input for the latest buyer offer of a snapshot
    pub fn from_snapshot(
        snapshot: &NegotiationSnapshot,
        context: MarketContext,
        config: SellerAgentConfiguration,
    ) -> Result<Self> {
        let offer = snapshot
            .latest_buyer_offer()
            .ok_or_else(|| AgentError::OfferNotFound(format!("no buyer offer on {}", snapshot.id())))?;
        let offer_price = offer.price.ok_or_else(|| {
            AgentError::InvalidInput(format!("{} carries no price", offer.id))
        })?;

        Ok(Self {
            offer_price,
            buyer_prices: snapshot.buyer_prices(),
            listing_price: snapshot.listing.listing_price,
            target_price: snapshot.listing.target_price,
            urgency: snapshot.listing.urgency,
            round: offer.round,
            max_rounds: snapshot.negotiation.max_rounds,
            config,
            context,
        })
    }

    pub fn validate(&self) -> Result<()> {
        validate_price(self.offer_price, "offer price")?;
        validate_price(self.listing_price, "listing price")?;
        if let Some(target) = self.target_price {
            validate_price(target, "target price")?;
        }
        if let Some(urgency) = self.urgency {
            if !urgency.is_finite() || !(0.0..=1.0).contains(&urgency) {
                return Err(AgentError::InvalidInput(format!(
                    "urgency must be in [0, 1], got {}",
                    urgency
                )));
            }
        }
        self.config.validate()
    }
}

/// Resolved view every rule reads. Defaults are already substituted.
#[derive(Clone, Debug)]
pub struct RuleInput<'a> {
    pub offer: f64,
    pub listing_price: f64,
    pub target_price: f64,
    pub urgency: f64,
    pub round: u32,
    pub max_rounds: u32,
    pub config: &'a SellerAgentConfiguration,
    pub context: &'a MarketContext,
    pub nash: &'a NashEstimate,
}

impl RuleInput<'_> {
    /// Price below which the agent does not counter
    pub fn min_acceptable(&self) -> f64 {
        self.listing_price * self.config.min_acceptable_ratio
    }

    /// Lowest offer the seller takes without haggling
    pub fn acceptance_bar(&self) -> f64 {
        self.target_price
            .min(self.listing_price * self.config.auto_accept_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_rules() {
        assert!(DecisionRule::Target.is_final());
        assert!(DecisionRule::MaxRounds.is_final());
        assert!(!DecisionRule::Nash.is_final());
        assert!(!DecisionRule::Competition.is_final());
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::assess(DecisionKind::Accept, 0.9), RiskLevel::Low);
        assert_eq!(RiskLevel::assess(DecisionKind::Accept, 0.6), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess(DecisionKind::Counter, 0.4), RiskLevel::High);
        assert_eq!(RiskLevel::assess(DecisionKind::Decline, 0.9), RiskLevel::High);
    }

    #[test]
    fn test_decision_serializes_camel_case() {
        let decision = Decision {
            decision: DecisionKind::Counter,
            counter_price: Some(880.0),
            reasoning: "counter".to_string(),
            confidence: 0.8,
            nash_equilibrium_price: 878.0,
            expected_outcome: ExpectedOutcome::BuyerResponds,
            risk_level: RiskLevel::Medium,
            rule: DecisionRule::Nash,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "COUNTER");
        assert_eq!(json["counterPrice"], 880.0);
        assert_eq!(json["nashEquilibriumPrice"], 878.0);
        assert_eq!(json["riskLevel"], "medium");
    }
}
