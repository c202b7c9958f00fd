use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Funds;

pub type CompanyId = i64;

/// A listed company. `issued_shares` counts every share unit ever issued and
/// must always equal the number of its share units in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub stock_price: Funds,
    pub issued_shares: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
