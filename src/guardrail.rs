//! Deterministic clamps on engine output.
//!
//! The guardrail never vetoes a decision. It moves a COUNTER price back into
//! a range that is safe for the seller and committable on the ledger, and
//! records a note for every rule it applied. When no price unit fits above
//! the offer and under the commit ceiling, the counter becomes a WAIT.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, ExpectedOutcome, RiskLevel};
use crate::market::Momentum;
use crate::negotiation::commit::COUNTER_MAX_OVER_BUYER;
use crate::negotiation::DecisionKind;
use crate::types::{floor_to_unit, is_unit_multiple, next_unit_above, round_to_unit, PRICE_UNIT};

/// Counters above this multiple of the offer fall back to the offer/listing midpoint
pub const MAX_COUNTER_RATIO: f64 = 1.25;
/// Ceiling over the offer while the buyer is moving up
pub const POSITIVE_MOMENTUM_CAP: f64 = 1.08;

const EPSILON: f64 = 1e-9;

/// Engine output after the guardrail
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Guarded {
    pub decision: Decision,
    /// Notes for every rule that changed the counter, joined with `; `
    pub adjustment: Option<String>,
}

impl Guarded {
    pub fn was_adjusted(&self) -> bool {
        self.adjustment.is_some()
    }
}

/// Clamp a decision against the buyer's offer
pub fn apply(mut decision: Decision, offer: f64, listing_price: f64, momentum: Momentum) -> Guarded {
    let Some(mut price) = decision
        .counter_price
        .filter(|_| decision.decision == DecisionKind::Counter)
    else {
        return Guarded {
            decision,
            adjustment: None,
        };
    };

    let mut notes = Vec::new();

    if !is_unit_multiple(price) {
        let adjusted = round_to_unit(price);
        notes.push(format!("counter ${:.2} rounded to ${:.2}", price, adjusted));
        price = adjusted;
    }

    if price > offer * MAX_COUNTER_RATIO + EPSILON {
        let adjusted = round_to_unit((offer + listing_price) / 2.0);
        notes.push(format!(
            "counter ${:.2} exceeded 125% of the offer, moved to midpoint ${:.2}",
            price, adjusted
        ));
        price = adjusted;
    }

    if momentum == Momentum::Positive && price > offer * POSITIVE_MOMENTUM_CAP + EPSILON {
        let adjusted = round_to_unit(offer * POSITIVE_MOMENTUM_CAP);
        notes.push(format!(
            "buyer is moving up, counter ${:.2} reduced to ${:.2}",
            price, adjusted
        ));
        price = adjusted;
    }

    if price <= offer + EPSILON {
        let adjusted = next_unit_above(offer);
        notes.push(format!(
            "counter ${:.2} did not exceed the offer, raised to ${:.2}",
            price, adjusted
        ));
        price = adjusted;
    }

    let ceiling = offer * COUNTER_MAX_OVER_BUYER;
    if price > ceiling + EPSILON {
        let adjusted = floor_to_unit(ceiling);
        if adjusted > offer + EPSILON {
            notes.push(format!(
                "counter ${:.2} above 120% of the offer, lowered to ${:.2}",
                price, adjusted
            ));
            price = adjusted;
        } else {
            notes.push(format!(
                "no ${:.0} step fits between the offer ${:.2} and 120% of it, holding instead",
                PRICE_UNIT, offer
            ));
            return hold(decision, offer, notes);
        }
    }

    if notes.is_empty() {
        return Guarded {
            decision,
            adjustment: None,
        };
    }

    let adjustment = notes.join("; ");
    tracing::debug!(offer, counter = price, %adjustment, "Guardrail adjusted counter");

    decision.counter_price = Some(price);
    decision.reasoning = format!("{} [guardrail: {}]", decision.reasoning, adjustment);
    Guarded {
        decision,
        adjustment: Some(adjustment),
    }
}

/// Turn an uncommittable counter into a WAIT
fn hold(mut decision: Decision, offer: f64, notes: Vec<String>) -> Guarded {
    let adjustment = notes.join("; ");
    tracing::debug!(offer, %adjustment, "Guardrail replaced counter with wait");

    decision.decision = DecisionKind::Wait;
    decision.counter_price = None;
    decision.expected_outcome = ExpectedOutcome::from(DecisionKind::Wait);
    decision.risk_level = RiskLevel::assess(DecisionKind::Wait, decision.confidence);
    decision.reasoning = format!("{} [guardrail: {}]", decision.reasoning, adjustment);
    Guarded {
        decision,
        adjustment: Some(adjustment),
    }
}
