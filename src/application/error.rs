use thiserror::Error;

use crate::domain::{CompanyId, Funds, RowFailure, StockId, UserId};

use super::FundsError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid stock attribute: {0}")]
    InvalidKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Seller and buyer can't be the same user ({0})")]
    SelfTransfer(UserId),

    #[error(
        "Not enough stock to sell: user {seller_id} owns {owned} share(s) of company {company_id}, requested {requested}"
    )]
    InsufficientShares {
        seller_id: UserId,
        company_id: CompanyId,
        owned: i64,
        requested: i64,
    },

    #[error("Invalid quantity: {0} (must be positive)")]
    InvalidQuantity(i64),

    #[error("No valid stock price for company {0}")]
    PriceUnavailable(CompanyId),

    #[error("Funds transfer failed: {0}")]
    FundsTransferFailed(#[source] FundsError),

    #[error(
        "Partial reassignment: {} share unit(s) moved, {} failed",
        .succeeded.len(),
        .failed.len()
    )]
    PartialReassignmentFailure {
        succeeded: Vec<StockId>,
        failed: Vec<RowFailure>,
        /// Price of the failed units paid back to the buyer, if the refund went through
        refunded: Option<Funds>,
    },

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Company not found: {0}")]
    CompanyNotFound(CompanyId),

    #[error("Company already exists: {0}")]
    CompanyAlreadyExists(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
