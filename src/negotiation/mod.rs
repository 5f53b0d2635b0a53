//! Negotiation ledger, snapshots and the commit protocol

pub mod commit;
pub mod ledger;
pub mod session;
pub mod types;

pub use commit::{CommitAction, CommitReceipt, CommitRejection, CommitRequest};
pub use ledger::{Ledger, LedgerSettings};
pub use session::NegotiationSnapshot;
pub use types::{
    AgentDecision, DecisionKind, DecisionRecord, Listing, MarketSnapshot, Negotiation,
    NegotiationStatus, Offer,
};
