// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use rust_decimal::Decimal;
use sharebook::application::ExchangeService;
use sharebook::domain::{CompanyId, NewUser, UserId};
use sharebook::Repository;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(ExchangeService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = ExchangeService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to create a migrated repository plus a service over the same store,
/// for tests that need to prepare rows directly.
pub async fn test_repository() -> Result<(Repository, ExchangeService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let repo = Repository::init(&format!("sqlite:{}?mode=rwc", db_path.display())).await?;
    let service = ExchangeService::new(repo.clone());
    Ok((repo, service, temp_dir))
}

/// Test fixture: a small market with one company and three traders
pub struct Market {
    pub seller: UserId,
    pub buyer: UserId,
    pub other: UserId,
    pub company: CompanyId,
}

impl Market {
    /// Seller holds `shares` units of "Acme" quoted at `price`; buyer and
    /// other start with `cash` each.
    pub async fn setup(
        service: &ExchangeService,
        shares: i64,
        price: Decimal,
        cash: Decimal,
    ) -> Result<Self> {
        let seller = service
            .register_user(NewUser::new("Seller", "seller@example.com", "secret"))
            .await?;
        let buyer = service
            .register_user(NewUser::new("Buyer", "buyer@example.com", "secret").with_funds(cash))
            .await?;
        let other = service
            .register_user(NewUser::new("Other", "other@example.com", "secret").with_funds(cash))
            .await?;
        let company = service
            .create_company("Acme".to_string(), Some(price))
            .await?;
        service.issue_shares(company.id, seller.id, shares).await?;

        Ok(Self {
            seller: seller.id,
            buyer: buyer.id,
            other: other.id,
            company: company.id,
        })
    }
}
