//! The decision cascade, one pure function per rule.
//!
//! Rules are tried in order and the first one that returns a proposal wins.
//! [`apply_urgency`] and [`round_counter`] then post-process the winner.

use crate::negotiation::DecisionKind;
use crate::types::{floor_to_unit, next_unit_above, round_to_unit};

use super::types::{DecisionRule, Proposal, RuleInput};

const EPSILON: f64 = 1e-9;

/// Competing offers needed before the competition rule applies
pub const MIN_COMPETITORS: usize = 2;
/// Share of target accepted once the round limit is reached
pub const FINAL_ROUND_RATIO: f64 = 0.85;
/// Share of the Nash price accepted outright
pub const NASH_ACCEPT_RATIO: f64 = 0.95;
/// Calculation confidence needed to follow the Nash recommendation
pub const NASH_CONFIDENCE_FLOOR: f64 = 0.7;
pub const FALLBACK_ACCEPT_RATIO: f64 = 0.90;
pub const FALLBACK_COUNTER_RATIO: f64 = 0.80;
pub const HIGH_URGENCY: f64 = 0.7;
pub const LOW_URGENCY: f64 = 0.3;
/// Counter ceiling over the offer for an urgent seller
pub const URGENT_COUNTER_CAP: f64 = 1.05;
/// Share of target a relaxed seller accepts without countering
pub const RELAXED_ACCEPT_RATIO: f64 = 0.95;

/// Rule 1: the offer meets the seller's acceptance bar
pub fn target_rule(input: &RuleInput<'_>) -> Option<Proposal> {
    let bar = input.acceptance_bar();
    if input.offer + EPSILON < bar {
        return None;
    }
    Some(Proposal::new(
        DecisionRule::Target,
        DecisionKind::Accept,
        0.95,
        format!(
            "Offer of ${:.2} meets the acceptance bar of ${:.2}",
            input.offer, bar
        ),
    ))
}

/// Rule 2: with several competing buyers, take anything at or above the
/// reserve and otherwise wait for the market to move
pub fn competition_rule(input: &RuleInput<'_>) -> Option<Proposal> {
    let stats = &input.context.stats;
    if stats.count < MIN_COMPETITORS {
        return None;
    }
    let reserve = stats.mean?.max(input.min_acceptable());

    if input.offer + EPSILON >= reserve {
        Some(Proposal::new(
            DecisionRule::Competition,
            DecisionKind::Accept,
            0.85,
            format!(
                "{} competing offers; ${:.2} clears the reserve of ${:.2}",
                stats.count, input.offer, reserve
            ),
        ))
    } else {
        Some(Proposal::new(
            DecisionRule::Competition,
            DecisionKind::Wait,
            0.75,
            format!(
                "{} competing offers; holding out for at least ${:.2}",
                stats.count, reserve
            ),
        ))
    }
}

/// Rule 3: the round limit is reached, close one way or the other
pub fn max_rounds_rule(input: &RuleInput<'_>) -> Option<Proposal> {
    if input.round < input.max_rounds {
        return None;
    }
    let floor = input.target_price * FINAL_ROUND_RATIO;

    let proposal = if input.offer + EPSILON >= floor {
        Proposal::new(
            DecisionRule::MaxRounds,
            DecisionKind::Accept,
            0.9,
            format!(
                "Round {} of {}: ${:.2} is within 85% of target",
                input.round, input.max_rounds, input.offer
            ),
        )
    } else {
        Proposal::new(
            DecisionRule::MaxRounds,
            DecisionKind::Decline,
            0.9,
            format!(
                "Round {} of {}: ${:.2} is below 85% of target, ending negotiation",
                input.round, input.max_rounds, input.offer
            ),
        )
    };
    Some(proposal)
}

/// Rule 4: follow the Nash reference when it is trustworthy, otherwise fall
/// back to the market value heuristic. Offers under the seller's minimum are
/// declined on either path, however low the reference price falls.
pub fn nash_rule(input: &RuleInput<'_>) -> Proposal {
    let nash = input.nash;
    if nash.confidence + EPSILON < NASH_CONFIDENCE_FLOOR {
        return market_fallback(input);
    }
    if let Some(decline) = below_minimum(input, DecisionRule::Nash, nash.confidence) {
        return decline;
    }

    if input.offer + EPSILON >= nash.price * NASH_ACCEPT_RATIO {
        Proposal::new(
            DecisionRule::Nash,
            DecisionKind::Accept,
            nash.confidence,
            format!(
                "Offer of ${:.2} is within 5% of the equilibrium price ${:.2}",
                input.offer, nash.price
            ),
        )
    } else {
        Proposal::counter(
            DecisionRule::Nash,
            nash.price,
            nash.confidence,
            format!(
                "Countering at the equilibrium price ${:.2} (buyer max est. ${:.2})",
                nash.price, nash.buyer_max
            ),
        )
    }
}

/// Market value heuristic used when the Nash estimate is unreliable
pub fn market_fallback(input: &RuleInput<'_>) -> Proposal {
    let value = input.context.market_value.value;
    if let Some(decline) = below_minimum(input, DecisionRule::MarketFallback, 0.6) {
        return decline;
    }

    if input.offer + EPSILON >= value * FALLBACK_ACCEPT_RATIO {
        Proposal::new(
            DecisionRule::MarketFallback,
            DecisionKind::Accept,
            0.6,
            format!(
                "Offer of ${:.2} is within 10% of the market value ${:.2}",
                input.offer, value
            ),
        )
    } else if input.offer + EPSILON >= value * FALLBACK_COUNTER_RATIO {
        let price = (input.offer + value) / 2.0;
        Proposal::counter(
            DecisionRule::MarketFallback,
            price,
            0.55,
            format!("Countering toward the market value ${:.2}", value),
        )
    } else {
        Proposal::new(
            DecisionRule::MarketFallback,
            DecisionKind::Decline,
            0.6,
            format!(
                "Offer of ${:.2} is far below the market value ${:.2}",
                input.offer, value
            ),
        )
    }
}

/// DECLINE for offers under `listing × min_acceptable_ratio`
fn below_minimum(input: &RuleInput<'_>, rule: DecisionRule, confidence: f64) -> Option<Proposal> {
    let minimum = input.min_acceptable();
    if input.offer + EPSILON >= minimum {
        return None;
    }
    Some(Proposal::new(
        rule,
        DecisionKind::Decline,
        confidence,
        format!(
            "Offer of ${:.2} is below the minimum of ${:.2}, not countering",
            input.offer, minimum
        ),
    ))
}

/// Rule 5: time pressure. Skipped for final rules.
pub fn apply_urgency(mut proposal: Proposal, input: &RuleInput<'_>) -> Proposal {
    if proposal.rule.is_final() {
        return proposal;
    }

    if input.urgency + EPSILON >= HIGH_URGENCY {
        if let Some(price) = proposal.counter_price {
            let cap = input.offer * URGENT_COUNTER_CAP;
            if price > cap + EPSILON {
                // largest unit price inside the cap; the unit above the offer when none fits
                let capped = Some(floor_to_unit(cap))
                    .filter(|p| *p > input.offer + EPSILON)
                    .unwrap_or_else(|| next_unit_above(input.offer));
                proposal.counter_price = Some(capped);
                proposal.reasoning.push_str("; urgent sale, counter kept within 5% of the offer");
            }
        }
    } else if input.urgency <= LOW_URGENCY + EPSILON
        && proposal.decision == DecisionKind::Accept
        && input.offer + EPSILON < input.target_price * RELAXED_ACCEPT_RATIO
    {
        let price = (input.offer + input.target_price) / 2.0;
        proposal.decision = DecisionKind::Counter;
        proposal.counter_price = Some(price);
        proposal.reasoning.push_str("; no time pressure, countering halfway to target");
    }

    proposal
}

/// Rule 6: counters land on the price unit
pub fn round_counter(mut proposal: Proposal) -> Proposal {
    proposal.counter_price = proposal.counter_price.map(round_to_unit);
    proposal
}
