//! Optional multi-step reasoning over an engine decision.
//!
//! A [`Reasoner`] is asked for one JSON reply at a time. Replies are either a
//! `thought`, which is recorded and fed back on the next step, or a `final`
//! answer that replaces the engine's decision. The loop stops at the step cap;
//! running out of steps, an unparseable reply or an inconsistent final answer
//! all fail the invocation. The guardrail still runs on whatever comes out.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::decision::{Decision, ExpectedOutcome, RiskLevel};
use crate::error::{AgentError, Result};
use crate::market::MarketContext;
use crate::negotiation::DecisionKind;

/// One recorded step of a reasoning chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step: u32,
    pub category: String,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// What the reasoner sees on every step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub step: u32,
    pub max_steps: u32,
    pub offer_price: f64,
    pub listing_price: f64,
    pub proposal: Decision,
    pub context: MarketContext,
    pub transcript: Vec<ReasoningStep>,
}

impl ReasoningRequest {
    /// JSON prompt body for text-based reasoners
    pub fn to_prompt(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Reply format expected from a reasoner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReasoningReply {
    Thought {
        category: String,
        reasoning: String,
        #[serde(default)]
        confidence: Option<f64>,
    },
    Final {
        decision: DecisionKind,
        #[serde(default)]
        counter_price: Option<f64>,
        confidence: f64,
        reasoning: String,
    },
}

/// A source of reasoning replies, typically a language model
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce the raw JSON reply for one step
    fn step<'a>(&'a self, request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String>>;
}

/// Full record of one reasoning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub reasoner: String,
    pub steps: Vec<ReasoningStep>,
    pub duration_ms: u64,
}

/// Parse a single reply
pub fn parse_reply(raw: &str) -> Result<ReasoningReply> {
    serde_json::from_str(raw.trim()).map_err(|e| AgentError::PolicyParse(e.to_string()))
}

/// Reject final answers that contradict themselves
pub fn check_consistency(reply: &ReasoningReply) -> Result<()> {
    let ReasoningReply::Final {
        decision,
        counter_price,
        confidence,
        ..
    } = reply
    else {
        return Ok(());
    };

    if !confidence.is_finite() || !(0.0..=1.0).contains(confidence) {
        return Err(AgentError::PolicyInconsistent(format!(
            "confidence {} outside [0, 1]",
            confidence
        )));
    }
    match (decision, counter_price) {
        (DecisionKind::Counter, None) => Err(AgentError::PolicyInconsistent(
            "COUNTER without a price".to_string(),
        )),
        (DecisionKind::Counter, Some(price)) if !price.is_finite() || *price <= 0.0 => {
            Err(AgentError::PolicyInconsistent(format!(
                "COUNTER at invalid price {}",
                price
            )))
        }
        (kind, Some(price)) if *kind != DecisionKind::Counter => {
            Err(AgentError::PolicyInconsistent(format!(
                "{} carries a counter price {}",
                kind, price
            )))
        }
        _ => Ok(()),
    }
}

/// Run the reasoning loop until a final answer or the step cap
pub async fn refine(
    reasoner: &dyn Reasoner,
    proposal: Decision,
    offer_price: f64,
    listing_price: f64,
    context: &MarketContext,
    max_steps: u32,
) -> Result<(Decision, ReasoningTrace)> {
    let started = Instant::now();
    let mut request = ReasoningRequest {
        step: 1,
        max_steps,
        offer_price,
        listing_price,
        proposal,
        context: context.clone(),
        transcript: Vec::new(),
    };

    while request.step <= max_steps {
        let raw = reasoner.step(&request).await?;
        let reply = parse_reply(&raw)?;
        check_consistency(&reply)?;

        match reply {
            ReasoningReply::Thought {
                category,
                reasoning,
                confidence,
            } => {
                tracing::debug!(step = request.step, %category, "Reasoning step");
                request.transcript.push(ReasoningStep {
                    step: request.step,
                    category,
                    reasoning,
                    confidence,
                });
                request.step += 1;
            }
            ReasoningReply::Final {
                decision,
                counter_price,
                confidence,
                reasoning,
            } => {
                request.transcript.push(ReasoningStep {
                    step: request.step,
                    category: "final".to_string(),
                    reasoning: reasoning.clone(),
                    confidence: Some(confidence),
                });

                let proposal = request.proposal;
                let refined = Decision {
                    decision,
                    counter_price,
                    reasoning: format!("{} | {}", proposal.reasoning, reasoning),
                    confidence,
                    nash_equilibrium_price: proposal.nash_equilibrium_price,
                    expected_outcome: ExpectedOutcome::from(decision),
                    risk_level: RiskLevel::assess(decision, confidence),
                    rule: proposal.rule,
                };
                let trace = ReasoningTrace {
                    reasoner: reasoner.name().to_string(),
                    steps: request.transcript,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                return Ok((refined, trace));
            }
        }
    }

    Err(AgentError::StepCapExceeded(max_steps))
}

/// Deterministic reasoner: one market summary thought, then confirms the
/// engine's proposal
#[derive(Debug, Default, Clone)]
pub struct EchoReasoner;

impl Reasoner for EchoReasoner {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn step<'a>(&'a self, request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String>> {
        async move {
            let reply = if request.transcript.is_empty() && request.max_steps > 1 {
                ReasoningReply::Thought {
                    category: "market".to_string(),
                    reasoning: format!(
                        "{} competing offers, buyer momentum {}, market value ${:.2}",
                        request.context.competing_count(),
                        request.context.momentum,
                        request.context.market_value.value
                    ),
                    confidence: None,
                }
            } else {
                ReasoningReply::Final {
                    decision: request.proposal.decision,
                    counter_price: request.proposal.counter_price,
                    confidence: request.proposal.confidence,
                    reasoning: "confirmed engine proposal".to_string(),
                }
            };
            Ok(serde_json::to_string(&reply)?)
        }
        .boxed()
    }
}

/// Replays canned replies in order
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedReasoner {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }
}

impl Reasoner for ScriptedReasoner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn step<'a>(&'a self, _request: &'a ReasoningRequest) -> BoxFuture<'a, Result<String>> {
        async move {
            self.replies
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| AgentError::PolicyParse("reasoner has no reply".to_string()))
        }
        .boxed()
    }
}
