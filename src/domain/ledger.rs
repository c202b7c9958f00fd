use serde::{Deserialize, Serialize};

use super::CompanyId;

/// Issued versus owned share units of one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareCount {
    pub company_id: CompanyId,
    pub company_name: String,
    pub issued: i64,
    pub owned: i64,
}

impl ShareCount {
    /// Conservation: every issued share unit has exactly one owner.
    pub fn is_conserved(&self) -> bool {
        self.issued == self.owned
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub user_count: i64,
    pub company_count: usize,
    pub stock_count: i64,
    pub share_counts: Vec<ShareCount>,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Build an integrity report from raw ledger statistics.
pub fn build_integrity_report(
    user_count: i64,
    stock_count: i64,
    share_counts: Vec<ShareCount>,
    orphaned_stocks: i64,
    unfinished_transfers: i64,
    unpaid_transfers: i64,
) -> IntegrityReport {
    let mut issues = Vec::new();

    for count in share_counts.iter().filter(|c| !c.is_conserved()) {
        issues.push(format!(
            "Company '{}' ({}) has {} issued share units but {} owned",
            count.company_name, count.company_id, count.issued, count.owned
        ));
    }

    if orphaned_stocks > 0 {
        issues.push(format!(
            "{} share unit(s) reference a missing owner or company",
            orphaned_stocks
        ));
    }

    if unfinished_transfers > 0 {
        issues.push(format!(
            "{} transfer(s) were paid but not completed (run `recover`)",
            unfinished_transfers
        ));
    }

    if unpaid_transfers > 0 {
        issues.push(format!(
            "{} transfer(s) were journaled but never paid (run `recover`)",
            unpaid_transfers
        ));
    }

    IntegrityReport {
        user_count,
        company_count: share_counts.len(),
        stock_count,
        share_counts,
        issues,
    }
}
