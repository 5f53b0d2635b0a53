//! Negotiator
//!
//! Seller-side negotiation agent for a peer-to-peer marketplace. Buyer offers
//! land in a shared ledger; the agent answers each one with ACCEPT, COUNTER,
//! WAIT or DECLINE:
//! - market context aggregation (momentum, competing offers, market value)
//! - a deterministic decision cascade around a Nash bargaining estimate
//! - a price guardrail on every counter
//! - an optimistic commit protocol so stale or replayed triggers write nothing
//! - queue workers and an immediate path sharing one pipeline

pub mod cli;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod guardrail;
pub mod market;
pub mod negotiation;
pub mod reasoning;
pub mod types;

// Re-export commonly used types
pub use config::{AgentSettings, SellerAgentConfiguration, SellerConfigStore};
pub use decision::{Decision, DecisionEngine, DecisionInput};
pub use dispatch::{Dispatcher, OfferTrigger, Pipeline, ProcessOutcome, TaskQueue, WorkerPool};
pub use error::{AgentError, ErrorClass, Result};
pub use market::{ItemInsights, MarketContext};
pub use negotiation::{CommitAction, CommitRequest, DecisionKind, Ledger, Listing, NegotiationStatus};
