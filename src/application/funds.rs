use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{Funds, PaymentKey, UserId, format_funds};
use crate::storage::{FundsMove, Repository};

#[derive(Error, Debug)]
pub enum FundsError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Funds),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("user {user_id} has {balance} available, {required} required")]
    InsufficientFunds {
        user_id: UserId,
        balance: Funds,
        required: Funds,
    },

    #[error("funds storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Moves cash between users. The transfer orchestrator only ever talks to
/// this trait, so any accounting backend can sit behind it.
///
/// Implementations must apply each `key` at most once: repeating a call with a
/// key that already went through succeeds without moving money again.
#[async_trait]
pub trait FundsService: Send + Sync {
    async fn transfer_funds(
        &self,
        from: UserId,
        to: UserId,
        amount: Funds,
        key: PaymentKey,
    ) -> Result<(), FundsError>;
}

/// Funds service backed by the `funds` column of the users table.
pub struct UserFunds {
    repo: Repository,
    // SQLite allows a single writer; queueing here avoids busy retries.
    write_lock: Mutex<()>,
}

impl UserFunds {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl FundsService for UserFunds {
    async fn transfer_funds(
        &self,
        from: UserId,
        to: UserId,
        amount: Funds,
        key: PaymentKey,
    ) -> Result<(), FundsError> {
        if amount <= Funds::ZERO {
            return Err(FundsError::InvalidAmount(amount));
        }

        let _guard = self.write_lock.lock().await;
        match self.repo.move_funds(from, to, amount, key).await? {
            FundsMove::Moved {
                sender_balance,
                recipient_balance,
            } => {
                debug!(
                    from,
                    to,
                    amount = %format_funds(amount),
                    sender_balance = %format_funds(sender_balance),
                    recipient_balance = %format_funds(recipient_balance),
                    "Funds transferred"
                );
                Ok(())
            }
            FundsMove::AlreadyApplied => {
                debug!(%key, "Payment already applied");
                Ok(())
            }
            FundsMove::SenderMissing => Err(FundsError::UserNotFound(from)),
            FundsMove::RecipientMissing => Err(FundsError::UserNotFound(to)),
            FundsMove::Insufficient { balance } => {
                warn!(
                    user_id = from,
                    balance = %format_funds(balance),
                    required = %format_funds(amount),
                    "Insufficient funds"
                );
                Err(FundsError::InsufficientFunds {
                    user_id: from,
                    balance,
                    required: amount,
                })
            }
        }
    }
}
