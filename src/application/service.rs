use std::sync::Arc;

use tracing::info;

use crate::domain::{
    build_integrity_report, format_funds, Company, CompanyId, DailyQuote, Funds, IntegrityReport,
    NewUser, StockId, StockTransfer, TransferId, TransferRequest, TransferStatus, User, UserId,
};
use crate::storage::Repository;

use super::{
    AppError, CompanyPriceResolver, FundsService, OwnershipLedger, PriceResolver, RecoveryResult,
    TransferService, UserFunds,
};

/// Application service providing high-level operations for the exchange.
/// This is the primary interface for any client (CLI, API, tests).
///
/// The store handle is created once here and shared with the ledger, the
/// funds service and the transfer orchestrator.
pub struct ExchangeService {
    repo: Repository,
    ledger: OwnershipLedger,
    transfers: TransferService,
    prices: CompanyPriceResolver,
}

impl ExchangeService {
    /// Create a new exchange service over the given repository, using the
    /// users table as funds service.
    pub fn new(repo: Repository) -> Self {
        let funds = Arc::new(UserFunds::new(repo.clone()));
        Self::with_funds_service(repo, funds)
    }

    /// Create an exchange service with a custom funds service.
    pub fn with_funds_service(repo: Repository, funds: Arc<dyn FundsService>) -> Self {
        Self {
            ledger: OwnershipLedger::new(repo.clone()),
            transfers: TransferService::new(repo.clone(), funds),
            prices: CompanyPriceResolver::new(repo.clone()),
            repo,
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database, applying any missing migration.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        repo.migrate().await?;
        Ok(Self::new(repo))
    }

    /// The ownership ledger over this service's store.
    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }

    // ========================
    // User operations
    // ========================

    /// Register a new user.
    pub async fn register_user(&self, new_user: NewUser) -> Result<User, AppError> {
        new_user.validate().map_err(AppError::InvalidInput)?;

        if self.repo.get_user_by_email(&new_user.email).await?.is_some() {
            return Err(AppError::UserAlreadyExists(new_user.email));
        }

        let user = self.repo.insert_user(&new_user).await?;
        info!(user_id = user.id, email = %user.email, "New user registered");
        Ok(user)
    }

    /// Get a user by id.
    pub async fn get_user(&self, id: UserId) -> Result<User, AppError> {
        self.repo
            .get_user(id)
            .await?
            .ok_or(AppError::UserNotFound(id))
    }

    /// List all users.
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.repo.list_users().await?)
    }

    /// Add funds to a user's balance. Returns the new balance.
    pub async fn deposit(&self, user_id: UserId, amount: Funds) -> Result<Funds, AppError> {
        if amount <= Funds::ZERO {
            return Err(AppError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let balance = self
            .repo
            .add_funds(user_id, amount)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;
        info!(user_id, amount = %format_funds(amount), "Funds deposited");
        Ok(balance)
    }

    // ========================
    // Company operations
    // ========================

    /// List a new company. Without a price, it is quoted at the daily open.
    pub async fn create_company(&self, name: String, stock_price: Option<Funds>) -> Result<Company, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "company name must not be empty".to_string(),
            ));
        }
        if self.repo.get_company_by_name(&name).await?.is_some() {
            return Err(AppError::CompanyAlreadyExists(name));
        }

        let stock_price = stock_price.unwrap_or(DailyQuote::default().open);
        if stock_price <= Funds::ZERO {
            return Err(AppError::InvalidAmount(
                "Stock price must be positive".to_string(),
            ));
        }

        let company = self.repo.insert_company(&name, stock_price).await?;
        info!(company_id = company.id, name = %company.name, "Company listed");
        Ok(company)
    }

    /// Get a company by id.
    pub async fn get_company(&self, id: CompanyId) -> Result<Company, AppError> {
        self.repo
            .get_company(id)
            .await?
            .ok_or(AppError::CompanyNotFound(id))
    }

    /// List all companies.
    pub async fn list_companies(&self) -> Result<Vec<Company>, AppError> {
        Ok(self.repo.list_companies().await?)
    }

    /// Quote a new stock price for a company.
    pub async fn set_stock_price(&self, id: CompanyId, stock_price: Funds) -> Result<Company, AppError> {
        if stock_price <= Funds::ZERO {
            return Err(AppError::InvalidAmount(
                "Stock price must be positive".to_string(),
            ));
        }
        if !self.repo.update_stock_price(id, stock_price).await? {
            return Err(AppError::CompanyNotFound(id));
        }
        self.get_company(id).await
    }

    /// Issue `count` new share units of a company to a user.
    pub async fn issue_shares(
        &self,
        company_id: CompanyId,
        owner_id: UserId,
        count: i64,
    ) -> Result<Vec<StockId>, AppError> {
        if count <= 0 {
            return Err(AppError::InvalidQuantity(count));
        }
        self.get_company(company_id).await?;
        self.get_user(owner_id).await?;

        let ids = self.repo.issue_shares(company_id, owner_id, count).await?;
        info!(company_id, owner_id, count, "Shares issued");
        Ok(ids)
    }

    // ========================
    // Transfer operations
    // ========================

    /// Sell share units at the company's quoted price.
    pub async fn transfer_ownership(&self, request: TransferRequest) -> Result<StockTransfer, AppError> {
        self.transfers
            .transfer_ownership(request, &self.prices)
            .await
    }

    /// Sell share units at a price supplied by the caller.
    pub async fn transfer_ownership_with(
        &self,
        request: TransferRequest,
        prices: &dyn PriceResolver,
    ) -> Result<StockTransfer, AppError> {
        self.transfers.transfer_ownership(request, prices).await
    }

    /// Get a journaled transfer by id.
    pub async fn get_transfer(&self, id: TransferId) -> Result<StockTransfer, AppError> {
        self.repo
            .get_transfer(id)
            .await?
            .ok_or_else(|| AppError::TransferNotFound(id.to_string()))
    }

    /// List journaled transfers, optionally with one status only.
    pub async fn list_transfers(&self, status: Option<TransferStatus>) -> Result<Vec<StockTransfer>, AppError> {
        Ok(self.repo.list_transfers(status).await?)
    }

    /// Finish transfers that were paid for but never completed.
    pub async fn recover_transfers(&self) -> Result<Vec<RecoveryResult>, AppError> {
        self.transfers.recover_transfers().await
    }

    // ========================
    // Integrity
    // ========================

    /// Verify share conservation and journal health.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let stats = self.repo.get_integrity_stats().await?;

        Ok(build_integrity_report(
            stats.user_count,
            stats.stock_count,
            stats.share_counts,
            stats.orphaned_stocks,
            stats.unfinished_transfers,
            stats.unpaid_transfers,
        ))
    }
}
