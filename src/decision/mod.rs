//! Seller-side decision engine

pub mod engine;
pub mod nash;
pub mod rules;
pub mod types;

pub use engine::DecisionEngine;
pub use nash::NashEstimate;
pub use types::{Decision, DecisionInput, DecisionRule, ExpectedOutcome, RiskLevel, RuleInput};
