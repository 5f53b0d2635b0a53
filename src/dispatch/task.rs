//! Units of dispatch work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::negotiation::{CommitReceipt, Listing};
use crate::types::{ItemId, NegotiationId, OfferId, SellerId, TaskId};

/// "New or updated buyer offer" event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferTrigger {
    pub negotiation_id: NegotiationId,
    pub offer_id: OfferId,
    pub seller_id: SellerId,
    pub item_id: ItemId,
    pub listing_price: f64,
    pub offer_price: f64,
    pub category: String,
}

impl OfferTrigger {
    /// Trigger for a freshly recorded buyer offer
    pub fn from_receipt(receipt: &CommitReceipt, listing: &Listing) -> Option<Self> {
        Some(Self {
            negotiation_id: receipt.negotiation,
            offer_id: receipt.offer.id,
            seller_id: listing.seller,
            item_id: listing.id,
            listing_price: listing.listing_price,
            offer_price: receipt.offer.price?,
            category: listing.category.clone(),
        })
    }
}

/// Queue task lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One queued unit of work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub trigger: OfferTrigger,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Earliest time a worker may pick this task up (seller response delay)
    pub not_before: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Failure reason, or why a completed task was discarded
    pub note: Option<String>,
}

impl Task {
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.not_before <= now
    }
}
