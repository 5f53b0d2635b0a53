//! The single processing entry point shared by the queue workers and the
//! immediate path.
//!
//! `process` reads snapshots, decides without holding any ledger lock and
//! then hands the result to the commit protocol, which re-checks freshness.
//! Replaying a trigger whose offer has been answered or superseded produces
//! no ledger write.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{AgentSettings, SellerConfigStore};
use crate::decision::{Decision, DecisionEngine, DecisionInput};
use crate::error::{AgentError, ErrorClass, Result};
use crate::guardrail;
use crate::market::MarketContext;
use crate::negotiation::{
    CommitAction, CommitReceipt, CommitRequest, DecisionKind, DecisionRecord, Ledger,
    NegotiationSnapshot,
};
use crate::reasoning::{self, Reasoner};
use crate::types::{validate_price, Side};

use super::task::OfferTrigger;

/// What the pipeline did with the decision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outbound result of one invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub success: bool,
    pub decision: Option<DecisionKind>,
    pub reasoning: String,
    pub action_result: ActionResult,
    pub execution_time_ms: u64,
}

impl ProcessOutcome {
    /// Structured failure for an invocation that wrote nothing
    pub fn failure(error: &AgentError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            decision: None,
            reasoning: String::new(),
            action_result: ActionResult {
                success: false,
                action: "none".to_string(),
                price: None,
                error: Some(error.to_string()),
            },
            execution_time_ms,
        }
    }
}

/// Shared processing pipeline
pub struct Pipeline {
    ledger: Ledger,
    configs: SellerConfigStore,
    engine: DecisionEngine,
    reasoner: Option<Arc<dyn Reasoner>>,
    settings: AgentSettings,
}

impl Pipeline {
    pub fn new(ledger: Ledger, configs: SellerConfigStore, settings: AgentSettings) -> Self {
        Self {
            ledger,
            configs,
            engine: DecisionEngine::new(),
            reasoner: None,
            settings,
        }
    }

    /// Run every decision through a reasoning step
    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn configs(&self) -> &SellerConfigStore {
        &self.configs
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Decide on one buyer offer and commit the result
    pub async fn process(&self, trigger: &OfferTrigger) -> Result<ProcessOutcome> {
        let started = Instant::now();
        let negotiation = trigger.negotiation_id;

        let result = self.run(trigger, started).await;
        match &result {
            Ok(outcome) => tracing::info!(
                negotiation = %negotiation,
                offer = %trigger.offer_id,
                decision = ?outcome.decision,
                price = ?outcome.action_result.price,
                elapsed_ms = outcome.execution_time_ms,
                "Offer processed"
            ),
            Err(e) => match e.class() {
                ErrorClass::Staleness => {
                    tracing::warn!(negotiation = %negotiation, offer = %trigger.offer_id, error = %e, "Discarding stale offer")
                }
                ErrorClass::Policy => {
                    tracing::error!(negotiation = %negotiation, offer = %trigger.offer_id, error = %e, "Decision failed")
                }
                _ => {
                    tracing::warn!(negotiation = %negotiation, offer = %trigger.offer_id, error = %e, "Offer not processed")
                }
            },
        }
        result
    }

    async fn run(&self, trigger: &OfferTrigger, started: Instant) -> Result<ProcessOutcome> {
        validate_price(trigger.offer_price, "offer price")?;
        validate_price(trigger.listing_price, "listing price")?;

        let snapshot = self.ledger.snapshot(trigger.negotiation_id).await?;
        check_trigger(trigger, &snapshot)?;

        let config = self.configs.get(trigger.seller_id).await;
        if !config.agent_enabled {
            return Err(AgentError::AgentDisabled(format!("seller {}", trigger.seller_id)));
        }
        if !snapshot.listing.agent_enabled {
            return Err(AgentError::AgentDisabled(format!("item {}", trigger.item_id)));
        }

        let siblings = self.ledger.sibling_snapshots(trigger.negotiation_id).await?;
        let context = MarketContext::aggregate(&snapshot, &siblings, Utc::now());
        tracing::debug!(
            negotiation = %trigger.negotiation_id,
            momentum = %context.momentum,
            competing = context.competing_count(),
            market_value = context.market_value.value,
            "Context aggregated"
        );

        let input = DecisionInput::from_snapshot(&snapshot, context.clone(), config)?;
        let offer_price = input.offer_price;
        let listing_price = input.listing_price;

        let timeout = self.settings.decision_timeout();
        let decision = tokio::time::timeout(timeout, self.decide(input, &context))
            .await
            .map_err(|_| AgentError::DecisionTimeout(timeout.as_millis() as u64))??;

        let guarded = guardrail::apply(decision, offer_price, listing_price, context.momentum);
        let decision = guarded.decision;

        let record = DecisionRecord {
            negotiation: trigger.negotiation_id,
            offer: trigger.offer_id,
            decision: decision.decision,
            original_price: offer_price,
            recommended_price: decision.counter_price,
            nash_price: decision.nash_equilibrium_price,
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            market: context.snapshot(snapshot.next_round(), started.elapsed().as_millis() as u64),
            guardrail_adjustment: guarded.adjustment,
        };

        let action = commit_action(&decision)?;
        let request = CommitRequest::new(trigger.negotiation_id, action)
            .acting_on(trigger.offer_id)
            .with_message(seller_message(&decision, offer_price))
            .from_agent(record);
        let receipt = self.ledger.commit(request).await?;

        Ok(outcome(&decision, &receipt, started))
    }

    async fn decide(&self, input: DecisionInput, context: &MarketContext) -> Result<Decision> {
        let decision = self.engine.decide(&input)?;
        let Some(reasoner) = &self.reasoner else {
            return Ok(decision);
        };

        let (refined, trace) = reasoning::refine(
            reasoner.as_ref(),
            decision,
            input.offer_price,
            input.listing_price,
            context,
            self.settings.max_reasoning_steps,
        )
        .await?;
        tracing::debug!(
            reasoner = %trace.reasoner,
            steps = trace.steps.len(),
            duration_ms = trace.duration_ms,
            "Reasoning finished"
        );
        Ok(refined)
    }
}

/// Fail fast when the trigger no longer describes the negotiation's open offer
fn check_trigger(trigger: &OfferTrigger, snapshot: &NegotiationSnapshot) -> Result<()> {
    let negotiation = &snapshot.negotiation;
    if negotiation.seller != trigger.seller_id || negotiation.item != trigger.item_id {
        return Err(AgentError::InvalidInput(format!(
            "trigger does not match {}",
            negotiation.id
        )));
    }
    if !negotiation.status.is_active() {
        return Err(AgentError::NegotiationClosed(negotiation.id.to_string()));
    }

    let latest = snapshot.latest_offer();
    let current = latest
        .filter(|o| o.side == Side::Buyer)
        .map(|o| o.id);
    if current != Some(trigger.offer_id) {
        return Err(AgentError::StaleOffer {
            acted_on: trigger.offer_id.to_string(),
            latest: latest
                .map(|o| o.id.to_string())
                .unwrap_or_else(|| "none".to_string()),
        });
    }
    Ok(())
}

fn commit_action(decision: &Decision) -> Result<CommitAction> {
    Ok(match decision.decision {
        DecisionKind::Accept => CommitAction::Accept,
        DecisionKind::Wait => CommitAction::Wait,
        DecisionKind::Decline => CommitAction::Decline,
        DecisionKind::Counter => {
            let price = decision.counter_price.ok_or_else(|| {
                AgentError::PolicyInconsistent("COUNTER without a price".to_string())
            })?;
            CommitAction::Counter { price }
        }
    })
}

/// Buyer-facing text for the ledger entry
fn seller_message(decision: &Decision, offer_price: f64) -> String {
    match (decision.decision, decision.counter_price) {
        (DecisionKind::Accept, _) => {
            format!("Great! I accept your offer of ${:.2}.", offer_price)
        }
        (DecisionKind::Counter, Some(price)) => {
            format!("Thanks for the offer. I could do ${:.2}.", price)
        }
        (DecisionKind::Wait, _) => {
            "Thanks for your offer. I'm reviewing a few offers and will get back to you.".to_string()
        }
        _ => "Thanks for your interest, but I can't go that low.".to_string(),
    }
}

fn outcome(decision: &Decision, receipt: &CommitReceipt, started: Instant) -> ProcessOutcome {
    let action = match decision.decision {
        DecisionKind::Accept => "accepted",
        DecisionKind::Counter => "countered",
        DecisionKind::Wait => "waited",
        DecisionKind::Decline => "declined",
    };
    ProcessOutcome {
        success: true,
        decision: Some(decision.decision),
        reasoning: decision.reasoning.clone(),
        action_result: ActionResult {
            success: true,
            action: action.to_string(),
            price: receipt.offer.price,
            error: None,
        },
        execution_time_ms: started.elapsed().as_millis() as u64,
    }
}
