use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CompanyId, Funds, StockId, UserId};

pub type TransferId = Uuid;

/// A request to sell `quantity` share units of a company from seller to buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub seller_id: UserId,
    pub buyer_id: UserId,
    pub company_id: CompanyId,
    pub quantity: i64,
}

impl TransferRequest {
    pub fn new(seller_id: UserId, buyer_id: UserId, company_id: CompanyId, quantity: i64) -> Self {
        Self {
            seller_id,
            buyer_id,
            company_id,
            quantity,
        }
    }
}

/// Lifecycle of a journaled share transfer.
///
/// pending -> funded -> completed
///    |          |
///  failed   compensated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Validated and priced, payment not yet made
    Pending,
    /// Buyer has paid, share units not yet (fully) reassigned
    Funded,
    /// Payment made and every share unit reassigned
    Completed,
    /// Payment failed; nothing moved
    Failed,
    /// Some share units could not be moved and their price was refunded
    Compensated,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Funded => "funded",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Compensated => "compensated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransferStatus::Pending),
            "funded" => Some(TransferStatus::Funded),
            "completed" => Some(TransferStatus::Completed),
            "failed" => Some(TransferStatus::Failed),
            "compensated" => Some(TransferStatus::Compensated),
            _ => None,
        }
    }

    /// Returns true once no further step will run for this transfer.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Compensated
        )
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Journal entry of a share transfer. Written before any money moves, so an
/// interrupted transfer can be driven to completion later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockTransfer {
    pub id: TransferId,
    pub seller_id: UserId,
    pub buyer_id: UserId,
    pub company_id: CompanyId,
    pub quantity: i64,
    pub unit_price: Funds,
    pub total_price: Funds,
    pub status: TransferStatus,
    /// Share units selected for the buyer, empty until selection happened
    pub stock_ids: Vec<StockId>,
    /// Last failure, if any
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockTransfer {
    pub fn new(request: &TransferRequest, unit_price: Funds, total_price: Funds) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            seller_id: request.seller_id,
            buyer_id: request.buyer_id,
            company_id: request.company_id,
            quantity: request.quantity,
            unit_price,
            total_price,
            status: TransferStatus::Pending,
            stock_ids: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_selection(&self) -> bool {
        !self.stock_ids.is_empty()
    }
}

/// One payment belonging to a journaled transfer. A funds service applies
/// each key at most once, so a re-driven transfer never pays twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentKey {
    /// Buyer pays seller the total price
    Purchase(TransferId),
    /// Seller pays back the price of units that could not be delivered
    Refund(TransferId),
}

impl PaymentKey {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            PaymentKey::Purchase(id) | PaymentKey::Refund(id) => *id,
        }
    }
}

impl std::fmt::Display for PaymentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentKey::Purchase(id) => write!(f, "purchase:{}", id),
            PaymentKey::Refund(id) => write!(f, "refund:{}", id),
        }
    }
}
