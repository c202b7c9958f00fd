use futures::future::join_all;
use tracing::warn;

use crate::domain::{
    total_owned, CompanyId, GroupBy, OwnershipGroup, ReassignmentReport, RowFailure, Stock,
    StockField, StockId, UserId,
};
use crate::storage::{ReassignGuard, Repository};

use super::AppError;

/// Read/write interface over share units.
#[derive(Clone)]
pub struct OwnershipLedger {
    repo: Repository,
}

impl OwnershipLedger {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// All share units, ordered by id.
    pub async fn get_stocks(&self) -> Result<Vec<Stock>, AppError> {
        Ok(self.repo.list_stocks().await?)
    }

    /// Share units whose attribute `key` equals `value`.
    ///
    /// `key` must name a share-unit field (`id`, `ownerId`, `companyId`);
    /// anything else is rejected before a query is built.
    pub async fn get_stocks_by_attribute(&self, key: &str, value: i64) -> Result<Vec<Stock>, AppError> {
        let field = StockField::from_str(key).ok_or_else(|| AppError::InvalidKey(key.to_string()))?;
        self.get_stocks_by_field(field, value).await
    }

    /// Typed form of [`Self::get_stocks_by_attribute`].
    pub async fn get_stocks_by_field(&self, field: StockField, value: i64) -> Result<Vec<Stock>, AppError> {
        let stocks = self.repo.find_stocks(field, value).await?;
        if stocks.is_empty() {
            return Err(AppError::NotFound(format!("no stocks with {} = {}", field, value)));
        }
        Ok(stocks)
    }

    /// Share units grouped by (owner, company), ordered by owner.
    pub async fn get_stocks_by_owner(&self) -> Result<Vec<OwnershipGroup>, AppError> {
        Ok(self.repo.group_stocks(GroupBy::Owner, None).await?)
    }

    /// Share units grouped by (company, owner), ordered by company.
    pub async fn get_stocks_by_company(&self) -> Result<Vec<OwnershipGroup>, AppError> {
        Ok(self.repo.group_stocks(GroupBy::Company, None).await?)
    }

    /// Holdings of one owner, one group per company.
    pub async fn get_stocks_from_owner(&self, owner_id: UserId) -> Result<Vec<OwnershipGroup>, AppError> {
        Ok(self.repo.group_stocks(GroupBy::Owner, Some(owner_id)).await?)
    }

    /// Holders of one company, one group per owner.
    pub async fn get_stocks_from_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<OwnershipGroup>, AppError> {
        Ok(self.repo.group_stocks(GroupBy::Company, Some(company_id)).await?)
    }

    pub async fn get_total_stocks_from_owner(&self, owner_id: UserId) -> Result<i64, AppError> {
        let groups = self.get_stocks_from_owner(owner_id).await?;
        Ok(total_owned(&groups))
    }

    pub async fn get_total_stocks_from_company(&self, company_id: CompanyId) -> Result<i64, AppError> {
        let groups = self.get_stocks_from_company(company_id).await?;
        Ok(total_owned(&groups))
    }

    /// Number of share units of `company_id` held by `owner_id`.
    pub async fn holdings(&self, owner_id: UserId, company_id: CompanyId) -> Result<i64, AppError> {
        let groups = self.get_stocks_from_owner(owner_id).await?;
        Ok(groups
            .iter()
            .filter(|g| g.company_id == company_id)
            .map(|g| g.owned)
            .sum())
    }

    /// The share units of `company_id` held by `owner_id`, ordered by id.
    pub async fn holding_units(&self, owner_id: UserId, company_id: CompanyId) -> Result<Vec<Stock>, AppError> {
        Ok(self.repo.find_holdings(owner_id, company_id).await?)
    }

    /// Give every listed share unit to `new_owner_id`, keeping its company.
    ///
    /// Rows are written concurrently and all awaited; the report lists every
    /// row that could not be written.
    pub async fn bulk_reassign(&self, stock_ids: &[StockId], new_owner_id: UserId) -> ReassignmentReport {
        self.reassign(stock_ids, new_owner_id, None).await
    }

    /// Like [`Self::bulk_reassign`], but a row only moves if it still belongs
    /// to the guard's owner and company (or already belongs to the new owner).
    pub async fn guarded_reassign(
        &self,
        stock_ids: &[StockId],
        new_owner_id: UserId,
        guard: ReassignGuard,
    ) -> ReassignmentReport {
        self.reassign(stock_ids, new_owner_id, Some(guard)).await
    }

    async fn reassign(
        &self,
        stock_ids: &[StockId],
        new_owner_id: UserId,
        guard: Option<ReassignGuard>,
    ) -> ReassignmentReport {
        let writes = stock_ids.iter().map(|&stock_id| async move {
            let result = self.repo.reassign_stock(stock_id, new_owner_id, guard).await;
            (stock_id, result)
        });

        let mut report = ReassignmentReport::default();
        for (stock_id, result) in join_all(writes).await {
            match result {
                Ok(true) => report.succeeded.push(stock_id),
                Ok(false) => report.failed.push(RowFailure {
                    stock_id,
                    reason: match guard {
                        Some(_) => "share unit no longer held by the seller".to_string(),
                        None => "share unit not found".to_string(),
                    },
                }),
                Err(e) => {
                    warn!(stock_id, error = %e, "Share unit reassignment failed");
                    report.failed.push(RowFailure {
                        stock_id,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        report
    }
}
