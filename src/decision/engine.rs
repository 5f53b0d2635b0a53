//! Decision engine: runs the rule cascade over one offer

use crate::error::Result;

use super::nash::{self, NashInputs};
use super::rules;
use super::types::{
    Decision, DecisionInput, ExpectedOutcome, RiskLevel, RuleInput, DEFAULT_INPUT_PENALTY,
    DEFAULT_URGENCY,
};

/// Stateless and pure over its input
#[derive(Clone, Debug, Default)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Decide how the seller answers the offer in `input`
    pub fn decide(&self, input: &DecisionInput) -> Result<Decision> {
        input.validate()?;

        let mut defaulted = 0;
        let target_price = input.target_price.unwrap_or_else(|| {
            defaulted += 1;
            input.listing_price
        });
        let urgency = input.urgency.unwrap_or_else(|| {
            defaulted += 1;
            DEFAULT_URGENCY
        });

        let estimate = nash::estimate(&NashInputs {
            target: target_price,
            listing: input.listing_price,
            buyer_max: nash::implied_buyer_max(
                &input.buyer_prices,
                input.offer_price,
                input.context.momentum,
            ),
            market_value: input.context.market_value.value,
            urgency,
            aggressiveness: input.config.aggressiveness,
            competing: input.context.competing_count(),
        });

        let rule_input = RuleInput {
            offer: input.offer_price,
            listing_price: input.listing_price,
            target_price,
            urgency,
            round: input.round,
            max_rounds: input.max_rounds,
            config: &input.config,
            context: &input.context,
            nash: &estimate,
        };

        let proposal = rules::target_rule(&rule_input)
            .or_else(|| rules::competition_rule(&rule_input))
            .or_else(|| rules::max_rounds_rule(&rule_input))
            .unwrap_or_else(|| rules::nash_rule(&rule_input));
        let proposal = rules::round_counter(rules::apply_urgency(proposal, &rule_input));

        let confidence =
            (proposal.confidence * DEFAULT_INPUT_PENALTY.powi(defaulted)).clamp(0.0, 1.0);

        tracing::debug!(
            rule = %proposal.rule,
            decision = %proposal.decision,
            offer = input.offer_price,
            counter = ?proposal.counter_price,
            nash = estimate.price,
            confidence,
            defaulted,
            "Decision computed"
        );

        Ok(Decision {
            decision: proposal.decision,
            counter_price: proposal.counter_price,
            reasoning: proposal.reasoning,
            confidence,
            nash_equilibrium_price: estimate.price,
            expected_outcome: ExpectedOutcome::from(proposal.decision),
            risk_level: RiskLevel::assess(proposal.decision, confidence),
            rule: proposal.rule,
        })
    }
}
