//! Error types for the negotiation agent

use thiserror::Error;

use crate::negotiation::commit::CommitRejection;

/// Coarse classification of an [`AgentError`], used by the dispatch layer to
/// decide what happens to the unit of work that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input or missing records. No state change, no retry.
    Input,
    /// The ledger moved on since the task was read. The task is discarded.
    Staleness,
    /// The decision step produced something unusable. The task is failed.
    Policy,
    /// A commit precondition failed at commit time.
    Conflict,
    Internal,
}

/// Main error type for the negotiation agent
#[derive(Error, Debug)]
pub enum AgentError {
    // Input errors
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Negotiation not found: {0}")]
    NegotiationNotFound(String),

    #[error("Offer not found: {0}")]
    OfferNotFound(String),

    #[error("Listing not found: {0}")]
    ListingNotFound(String),

    #[error("Listing already registered: {0}")]
    ListingExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Agent disabled: {0}")]
    AgentDisabled(String),

    // Staleness errors
    #[error("Stale offer: acted on {acted_on}, latest buyer offer is {latest}")]
    StaleOffer { acted_on: String, latest: String },

    #[error("Negotiation {0} is no longer active")]
    NegotiationClosed(String),

    // Policy errors
    #[error("Reasoning response could not be parsed: {0}")]
    PolicyParse(String),

    #[error("Inconsistent decision: {0}")]
    PolicyInconsistent(String),

    #[error("Reasoning step cap of {0} reached without a final answer")]
    StepCapExceeded(u32),

    #[error("Decision timed out after {0} ms")]
    DecisionTimeout(u64),

    // Commit conflicts
    #[error("Commit rejected: {0}")]
    Commit(#[from] CommitRejection),

    // Queue errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition: {0}")]
    InvalidTaskTransition(String),

    // Configuration errors
    #[error("Invalid configuration value: {0}")]
    InvalidConfig(String),

    // General errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Classify this error for the dispatch layer
    pub fn class(&self) -> ErrorClass {
        match self {
            AgentError::InvalidPrice(_)
            | AgentError::NegotiationNotFound(_)
            | AgentError::OfferNotFound(_)
            | AgentError::ListingNotFound(_)
            | AgentError::ListingExists(_)
            | AgentError::InvalidInput(_)
            | AgentError::AgentDisabled(_)
            | AgentError::InvalidConfig(_) => ErrorClass::Input,

            AgentError::StaleOffer { .. } | AgentError::NegotiationClosed(_) => {
                ErrorClass::Staleness
            }

            AgentError::PolicyParse(_)
            | AgentError::PolicyInconsistent(_)
            | AgentError::StepCapExceeded(_)
            | AgentError::DecisionTimeout(_)
            | AgentError::Json(_) => ErrorClass::Policy,

            AgentError::Commit(rejection) if rejection.is_stale() => ErrorClass::Staleness,
            AgentError::Commit(_) => ErrorClass::Conflict,

            AgentError::TaskNotFound(_)
            | AgentError::InvalidTaskTransition(_)
            | AgentError::Internal(_) => ErrorClass::Internal,
        }
    }
}

/// Result type alias for negotiation agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NegotiationId, OfferId};

    #[test]
    fn test_error_creation() {
        let err = AgentError::NegotiationNotFound("neg_12".to_string());
        assert_eq!(err.to_string(), "Negotiation not found: neg_12");
    }

    #[test]
    fn test_stale_offer_message() {
        let err = AgentError::StaleOffer {
            acted_on: "offer_3".to_string(),
            latest: "offer_5".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Stale offer: acted on offer_3, latest buyer offer is offer_5"
        );
        assert_eq!(err.class(), ErrorClass::Staleness);
    }

    #[test]
    fn test_commit_rejection_classification() {
        let stale: AgentError = CommitRejection::StaleOffer {
            negotiation: NegotiationId(1),
            acted_on: OfferId(2),
            latest: Some(OfferId(4)),
        }
        .into();
        assert_eq!(stale.class(), ErrorClass::Staleness);

        let bounds: AgentError = CommitRejection::PriceOutOfBounds {
            price: 900.0,
            min: 100.0,
            max: 500.0,
        }
        .into();
        assert_eq!(bounds.class(), ErrorClass::Conflict);
    }

    #[test]
    fn test_policy_classification() {
        assert_eq!(AgentError::StepCapExceeded(4).class(), ErrorClass::Policy);
        assert_eq!(AgentError::DecisionTimeout(250).class(), ErrorClass::Policy);
        assert_eq!(
            AgentError::InvalidPrice("-5".to_string()).class(),
            ErrorClass::Input
        );
    }

    #[test]
    fn test_json_conversion() {
        fn parse() -> Result<serde_json::Value> {
            Ok(serde_json::from_str("{not json")?)
        }

        let result = parse();
        assert!(matches!(result.unwrap_err(), AgentError::Json(_)));
    }
}
