use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{CompanyId, Funds};
use crate::storage::Repository;

/// Resolves the current unit price of a company's stock.
/// `None` means no price is known.
#[async_trait]
pub trait PriceResolver: Send + Sync {
    async fn stock_price(&self, company_id: CompanyId) -> Result<Option<Funds>>;
}

/// Prices every company at the same constant.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrice(pub Funds);

#[async_trait]
impl PriceResolver for FixedPrice {
    async fn stock_price(&self, _company_id: CompanyId) -> Result<Option<Funds>> {
        Ok(Some(self.0))
    }
}

/// Reads the price quoted on the company record.
#[derive(Clone)]
pub struct CompanyPriceResolver {
    repo: Repository,
}

impl CompanyPriceResolver {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PriceResolver for CompanyPriceResolver {
    async fn stock_price(&self, company_id: CompanyId) -> Result<Option<Funds>> {
        Ok(self
            .repo
            .get_company(company_id)
            .await?
            .map(|company| company.stock_price))
    }
}
