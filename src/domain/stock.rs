use serde::{Deserialize, Serialize};

use super::{CompanyId, UserId};

pub type StockId = i64;

/// One indivisible share unit of a company, owned by exactly one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub owner_id: UserId,
    pub company_id: CompanyId,
}

/// The closed set of share-unit fields that lookups may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockField {
    Id,
    OwnerId,
    CompanyId,
}

impl StockField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockField::Id => "id",
            StockField::OwnerId => "ownerId",
            StockField::CompanyId => "companyId",
        }
    }

    /// Column name in the `stocks` table.
    pub fn column(&self) -> &'static str {
        match self {
            StockField::Id => "id",
            StockField::OwnerId => "owner_id",
            StockField::CompanyId => "company_id",
        }
    }

    /// Accepts both the camelCase attribute name and the column name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "id" => Some(StockField::Id),
            "ownerId" | "owner_id" => Some(StockField::OwnerId),
            "companyId" | "company_id" => Some(StockField::CompanyId),
            _ => None,
        }
    }
}

impl std::fmt::Display for StockField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Grouping used by the ownership aggregation views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    /// Group by (owner, company), ordered by owner
    Owner,
    /// Group by (company, owner), ordered by company
    Company,
}

impl GroupBy {
    /// The (primary, secondary) columns of the grouping.
    pub fn columns(&self) -> (&'static str, &'static str) {
        match self {
            GroupBy::Owner => ("owner_id", "company_id"),
            GroupBy::Company => ("company_id", "owner_id"),
        }
    }
}

/// Number of share units one owner holds in one company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipGroup {
    pub owner_id: UserId,
    pub company_id: CompanyId,
    pub owned: i64,
}

/// Sum of `owned` across the given groups.
pub fn total_owned(groups: &[OwnershipGroup]) -> i64 {
    groups.iter().map(|g| g.owned).sum()
}

/// Pick the share units to hand over in a sale: the `quantity` lowest ids of
/// the given company. Returns fewer ids when not enough units are available.
pub fn select_for_sale(stocks: &[Stock], company_id: CompanyId, quantity: usize) -> Vec<StockId> {
    let mut ids: Vec<StockId> = stocks
        .iter()
        .filter(|s| s.company_id == company_id)
        .map(|s| s.id)
        .collect();
    ids.sort_unstable();
    ids.truncate(quantity);
    ids
}

/// A share unit that could not be reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub stock_id: StockId,
    pub reason: String,
}

/// Per-row outcome of a bulk reassignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentReport {
    pub succeeded: Vec<StockId>,
    pub failed: Vec<RowFailure>,
}

impl ReassignmentReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<StockId> {
        self.failed.iter().map(|f| f.stock_id).collect()
    }
}
