//! Negotiator application wiring the ledger, pipeline and workers together

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AgentSettings, SellerAgentConfiguration, SellerConfigStore};
use crate::decision::{DecisionEngine, DecisionInput};
use crate::dispatch::{Dispatcher, Pipeline, ProcessOutcome, TaskQueue, WorkerPool};
use crate::error::{AgentError, Result};
use crate::guardrail::{self, Guarded};
use crate::market::{
    estimate_market_value, insights, CompetingOffer, CompetitionStats, ItemInsights,
    MarketContext, MarketValue, Momentum,
};
use crate::negotiation::{
    CommitAction, CommitRequest, Ledger, LedgerSettings, Listing, NegotiationSnapshot,
    NegotiationStatus,
};
use crate::reasoning::EchoReasoner;
use crate::types::{round_to_unit, BuyerHandle, BuyerId, ItemId, NegotiationId, SellerId, Side, PRICE_UNIT};

use super::commands::{DecideArgs, SimulateArgs};

/// Longest the simulation waits for the queue to drain after one buyer round
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of an offline decision
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideReport {
    #[serde(flatten)]
    pub guarded: Guarded,
    pub momentum: Momentum,
    pub market_value: MarketValue,
}

/// Evaluate one offer without a ledger
pub fn decide(args: &DecideArgs, settings: &AgentSettings) -> Result<DecideReport> {
    let now = Utc::now();
    let mut listing = Listing::new(
        ItemId(1),
        SellerId(1),
        "offline",
        args.category.as_str(),
        args.condition.as_str(),
        args.listing_price,
    )
    .with_listed_at(now - chrono::Duration::days(args.days_on_market.max(0)));
    listing.target_price = args.target;
    listing.urgency = args.urgency;

    let competing: Vec<CompetingOffer> = args
        .competing
        .iter()
        .enumerate()
        .map(|(i, &price)| CompetingOffer {
            price,
            buyer: BuyerHandle::anonymize(BuyerId(i as u64 + 2)),
            age_hours: 0.0,
        })
        .collect();

    let mut buyer_prices = args.history.clone();
    buyer_prices.push(args.offer);

    let context = MarketContext {
        momentum: Momentum::from_prices(&buyer_prices),
        stats: CompetitionStats::from_offers(&competing),
        competing,
        market_value: estimate_market_value(&listing, now),
        buyer_offer_count: buyer_prices.len(),
    };

    let config = SellerAgentConfiguration {
        aggressiveness: args.aggressiveness,
        auto_accept_threshold: args.auto_accept_threshold,
        min_acceptable_ratio: args.min_acceptable_ratio,
        ..SellerAgentConfiguration::default()
    };

    let input = DecisionInput {
        offer_price: args.offer,
        buyer_prices,
        listing_price: listing.listing_price,
        target_price: listing.target_price,
        urgency: listing.urgency,
        round: args.round,
        max_rounds: settings.max_rounds,
        config,
        context: context.clone(),
    };

    let decision = DecisionEngine::new().decide(&input)?;
    let guarded = guardrail::apply(decision, args.offer, args.listing_price, context.momentum);
    if let Some(note) = &guarded.adjustment {
        tracing::info!("Guardrail adjusted counter: {}", note);
    }

    Ok(DecideReport {
        guarded,
        momentum: context.momentum,
        market_value: context.market_value,
    })
}

/// One ledger entry as printed in a report
#[derive(Debug, Serialize)]
pub struct OfferLine {
    pub round: u32,
    pub side: Side,
    pub price: Option<f64>,
    pub from_agent: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct NegotiationSummary {
    pub id: NegotiationId,
    pub buyer: BuyerHandle,
    pub status: NegotiationStatus,
    pub final_price: Option<f64>,
    pub offers: Vec<OfferLine>,
}

impl From<&NegotiationSnapshot> for NegotiationSummary {
    fn from(snapshot: &NegotiationSnapshot) -> Self {
        Self {
            id: snapshot.id(),
            buyer: BuyerHandle::anonymize(snapshot.negotiation.buyer),
            status: snapshot.status(),
            final_price: snapshot.negotiation.final_price,
            offers: snapshot
                .offers
                .iter()
                .map(|o| OfferLine {
                    round: o.round,
                    side: o.side,
                    price: o.price,
                    from_agent: o.from_agent,
                    message: o.message.clone(),
                })
                .collect(),
        }
    }
}

/// Everything a simulation run produced
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub listing: Listing,
    pub rounds_played: u32,
    /// Outcomes of the immediate path; empty when the workers answered
    pub outcomes: Vec<ProcessOutcome>,
    /// Seller view of the offers after the opening round
    pub opening_insights: ItemInsights,
    pub agent_decisions: usize,
    pub negotiations: Vec<NegotiationSummary>,
}

/// A simulated buyer
struct Buyer {
    id: BuyerId,
    budget: f64,
    next_offer: Option<f64>,
    negotiation: Option<NegotiationId>,
}

/// Main negotiator application
pub struct NegotiatorApp {
    dispatcher: Dispatcher,
    pool: Option<WorkerPool>,
}

impl NegotiatorApp {
    /// Wire a fresh ledger and pipeline for one listing
    pub async fn new(settings: AgentSettings, listing: Listing, reasoning: bool) -> Result<Self> {
        settings.validate()?;

        let ledger = Ledger::new(LedgerSettings::from(&settings));
        ledger.register_listing(listing).await?;

        let mut pipeline = Pipeline::new(ledger, SellerConfigStore::new(), settings);
        if reasoning {
            pipeline = pipeline.with_reasoner(Arc::new(EchoReasoner));
        }

        Ok(Self {
            dispatcher: Dispatcher::new(Arc::new(pipeline), TaskQueue::new()),
            pool: None,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ledger(&self) -> &Ledger {
        self.dispatcher.pipeline().ledger()
    }

    /// Start the queue workers
    pub fn start_workers(&mut self) {
        if self.pool.is_none() {
            let pipeline = self.dispatcher.pipeline().clone();
            let queue = self.dispatcher.queue().clone();
            self.pool = Some(WorkerPool::start(pipeline, queue));
        }
    }

    /// Stop the queue workers, if running
    pub async fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown().await;
        }
    }

    async fn drain(&self) -> Result<()> {
        let poll = self.dispatcher.pipeline().settings().poll_interval();
        tokio::time::timeout(DRAIN_TIMEOUT, self.dispatcher.queue().wait_idle(poll))
            .await
            .map_err(|_| AgentError::Internal("queue did not drain".to_string()))
    }

    /// Run the buyers against the listing until it sells or they give up
    pub async fn simulate(&mut self, args: &SimulateArgs, item: ItemId) -> Result<SimulationReport> {
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let listing = self.ledger().listing(item).await?;

        let mut buyers: Vec<Buyer> = (1..=u64::from(args.buyers))
            .map(|id| {
                let budget = round_to_unit(listing.listing_price * rng.gen_range(0.75..=1.0));
                let opening = round_to_unit(budget * rng.gen_range(0.60..0.85));
                Buyer {
                    id: BuyerId(id),
                    budget,
                    next_offer: Some(opening.max(PRICE_UNIT)),
                    negotiation: None,
                }
            })
            .collect();

        if !args.immediate {
            self.start_workers();
        }

        let mut outcomes = Vec::new();
        let mut opening_insights = None;
        let mut rounds_played = 0;

        for round in 1..=args.rounds {
            if buyers.iter().all(|b| b.next_offer.is_none()) {
                break;
            }
            rounds_played = round;
            tracing::info!(round, "Buyer round");

            for buyer in buyers.iter_mut() {
                let Some(price) = buyer.next_offer.take() else {
                    continue;
                };
                let message = format!("Would you take ${:.0}?", price);
                let submitted = if args.immediate {
                    self.dispatcher
                        .submit_immediate(item, buyer.id, price, &message)
                        .await
                        .map(|(receipt, outcome)| {
                            outcomes.push(outcome);
                            receipt
                        })
                } else {
                    self.dispatcher
                        .submit_queued(item, buyer.id, price, &message)
                        .await
                        .map(|(receipt, _)| receipt)
                };
                match submitted {
                    Ok(receipt) => buyer.negotiation = Some(receipt.negotiation),
                    Err(e) => tracing::info!(buyer = %buyer.id, error = %e, "Buyer offer not recorded"),
                }
            }

            if !args.immediate {
                self.drain().await?;
            }

            if opening_insights.is_none() {
                let snapshots = self.ledger().item_snapshots(item).await?;
                opening_insights = Some(insights::analyze(&listing, &snapshots));
            }

            for buyer in buyers.iter_mut() {
                buyer.next_offer = self.respond(buyer).await?;
            }
        }

        self.shutdown().await;

        let snapshots = self.ledger().item_snapshots(item).await?;
        let opening_insights = match opening_insights {
            Some(insights) => insights,
            None => insights::analyze(&listing, &snapshots),
        };

        Ok(SimulationReport {
            listing: self.ledger().listing(item).await?,
            rounds_played,
            outcomes,
            opening_insights,
            agent_decisions: self.ledger().decision_count().await,
            negotiations: snapshots.iter().map(NegotiationSummary::from).collect(),
        })
    }

    /// The buyer's reaction to the seller's latest entry. Returns the next
    /// offer, or `None` when the buyer is done.
    async fn respond(&self, buyer: &Buyer) -> Result<Option<f64>> {
        let Some(id) = buyer.negotiation else {
            return Ok(None);
        };
        let snapshot = self.ledger().snapshot(id).await?;
        if !snapshot.status().is_active() {
            return Ok(None);
        }
        let Some(last) = snapshot.latest_buyer_price() else {
            return Ok(None);
        };
        let Some(latest) = snapshot.latest_offer().filter(|o| o.side == Side::Seller) else {
            return Ok(None);
        };

        match latest.price {
            Some(counter) if counter <= buyer.budget => {
                let taken = CommitRequest::new(id, CommitAction::BuyerAcceptCounter)
                    .acting_on(latest.id)
                    .with_message("Deal!");
                let receipt = self.ledger().commit(taken).await?;
                let confirm = CommitRequest::new(id, CommitAction::ConfirmDeal)
                    .acting_on(receipt.offer.id)
                    .with_message("Confirmed, see you at pickup.");
                self.ledger().commit(confirm).await?;
                tracing::info!(buyer = %buyer.id, price = counter, "Buyer took the counter");
                Ok(None)
            }
            Some(counter) => {
                let next = round_to_unit(last + (counter - last) / 2.0).min(buyer.budget);
                Ok((next > last).then_some(next))
            }
            None => {
                let next = (last + 2.0 * PRICE_UNIT).min(buyer.budget);
                Ok((next > last).then_some(next))
            }
        }
    }
}

/// Build the listing a simulation runs against
pub fn simulation_listing(args: &SimulateArgs) -> Listing {
    let mut listing = Listing::new(
        ItemId(1),
        SellerId(1),
        format!("Used {}", args.category),
        args.category.as_str(),
        args.condition.as_str(),
        args.listing_price,
    );
    listing.target_price = args.target;
    listing.urgency = args.urgency;
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Aggressiveness;
    use crate::negotiation::DecisionKind;

    fn decide_args(offer: f64) -> DecideArgs {
        DecideArgs {
            listing_price: 1000.0,
            offer,
            history: Vec::new(),
            target: Some(1000.0),
            urgency: Some(0.0),
            competing: Vec::new(),
            category: "couch".to_string(),
            condition: "good".to_string(),
            days_on_market: 0,
            round: 1,
            aggressiveness: Aggressiveness::Moderate,
            auto_accept_threshold: 0.95,
            min_acceptable_ratio: 0.70,
        }
    }

    fn simulate_args(immediate: bool) -> SimulateArgs {
        SimulateArgs {
            listing_price: 400.0,
            buyers: 3,
            category: "bookshelf".to_string(),
            condition: "good".to_string(),
            target: None,
            urgency: None,
            rounds: 6,
            seed: Some(7),
            immediate,
            reasoning: false,
        }
    }

    #[test]
    fn test_decide_accepts_at_target() {
        let report = decide(&decide_args(950.0), &AgentSettings::default()).unwrap();
        assert_eq!(report.guarded.decision.decision, DecisionKind::Accept);
        assert!(!report.guarded.was_adjusted());
    }

    #[test]
    fn test_decide_never_accepts_lowball() {
        let report = decide(&decide_args(600.0), &AgentSettings::default()).unwrap();
        assert_ne!(report.guarded.decision.decision, DecisionKind::Accept);
    }

    #[test]
    fn test_decide_rejects_bad_offer() {
        assert!(decide(&decide_args(-5.0), &AgentSettings::default()).is_err());
    }

    #[test]
    fn test_decide_report_json() {
        let report = decide(&decide_args(950.0), &AgentSettings::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["decision"]["decision"], "ACCEPT");
        assert_eq!(json["momentum"], "neutral");
        assert!(json["marketValue"]["value"].as_f64().unwrap() > 0.0);
    }

    async fn run(immediate: bool) -> SimulationReport {
        let args = simulate_args(immediate);
        let settings = AgentSettings {
            poll_interval_ms: 5,
            ..AgentSettings::default()
        };
        let mut app = NegotiatorApp::new(settings, simulation_listing(&args), false)
            .await
            .unwrap();
        app.simulate(&args, ItemId(1)).await.unwrap()
    }

    #[tokio::test]
    async fn test_simulation_immediate_path() {
        let report = run(true).await;
        assert_eq!(report.negotiations.len(), 3);
        assert!(!report.outcomes.is_empty());
        assert!(report.agent_decisions > 0);
        assert!(report.negotiations.iter().all(|n| n.offers[0].side == Side::Buyer));
        let closed = report
            .negotiations
            .iter()
            .filter(|n| n.status == NegotiationStatus::Completed)
            .count();
        assert!(closed <= 1);
    }

    #[tokio::test]
    async fn test_simulation_queued_path() {
        let report = run(false).await;
        assert_eq!(report.negotiations.len(), 3);
        assert!(report.outcomes.is_empty());
        assert!(report.agent_decisions > 0);
        assert!(report.opening_insights.total_offers <= 3);
        let buyer_offers: usize = report
            .negotiations
            .iter()
            .map(|n| n.offers.iter().filter(|o| o.side == Side::Buyer).count())
            .sum();
        assert!(buyer_offers >= 3);
    }
}
