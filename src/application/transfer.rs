use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::domain::{
    format_funds, select_for_sale, total_price, Funds, PaymentKey, StockTransfer, TransferId,
    TransferRequest, TransferStatus,
};
use crate::storage::{ReassignGuard, Repository};

use super::{AppError, CompanyLocks, FundsService, OwnershipLedger, PriceResolver};

/// Outcome of re-driving one interrupted transfer.
pub struct RecoveryResult {
    pub transfer_id: TransferId,
    pub outcome: Result<StockTransfer, AppError>,
}

/// Sells share units from one user to another: validates the sale, prices it,
/// moves the money and then the share units.
///
/// Every transfer is journaled before money moves. Transfers of the same
/// company are serialized, so two sales can never hand out the same unit.
pub struct TransferService {
    repo: Repository,
    ledger: OwnershipLedger,
    funds: Arc<dyn FundsService>,
    locks: CompanyLocks,
}

impl TransferService {
    pub fn new(repo: Repository, funds: Arc<dyn FundsService>) -> Self {
        Self {
            ledger: OwnershipLedger::new(repo.clone()),
            repo,
            funds,
            locks: CompanyLocks::new(),
        }
    }

    /// Sell `request.quantity` share units of `request.company_id` from the
    /// seller to the buyer at the price given by `prices`.
    ///
    /// Nothing moves unless validation and pricing pass, and no share unit
    /// moves unless the buyer has paid. If some units cannot be handed over,
    /// their price is refunded and `PartialReassignmentFailure` is returned.
    pub async fn transfer_ownership(
        &self,
        request: TransferRequest,
        prices: &dyn PriceResolver,
    ) -> Result<StockTransfer, AppError> {
        let TransferRequest {
            seller_id,
            buyer_id,
            company_id,
            quantity,
        } = request;

        if quantity <= 0 {
            return Err(AppError::InvalidQuantity(quantity));
        }
        if seller_id == buyer_id {
            return Err(AppError::SelfTransfer(seller_id));
        }
        for user_id in [seller_id, buyer_id] {
            if self.repo.get_user(user_id).await?.is_none() {
                return Err(AppError::UserNotFound(user_id));
            }
        }

        let _company_lock = self.locks.lock(company_id).await;

        let owned = self.ledger.holdings(seller_id, company_id).await?;
        if owned < quantity {
            debug!(seller_id, company_id, owned, quantity, "Rejected sale: not enough shares");
            return Err(AppError::InsufficientShares {
                seller_id,
                company_id,
                owned,
                requested: quantity,
            });
        }

        let unit_price = match prices.stock_price(company_id).await? {
            Some(price) if price > Funds::ZERO => price,
            _ => return Err(AppError::PriceUnavailable(company_id)),
        };
        let total = total_price(unit_price, quantity).ok_or_else(|| {
            AppError::InvalidAmount(format!("{} x {} overflows", unit_price, quantity))
        })?;

        let transfer = StockTransfer::new(&request, unit_price, total);
        self.repo.save_transfer(&transfer).await?;

        self.settle(transfer).await
    }

    /// Re-drive every transfer the journal does not show as finished, e.g.
    /// because the caller went away mid-operation.
    ///
    /// A `pending` entry is paid under its purchase key, which never charges
    /// the buyer twice, then delivered. A `funded` entry is delivered.
    pub async fn recover_transfers(&self) -> Result<Vec<RecoveryResult>, AppError> {
        let open: Vec<_> = self
            .repo
            .list_transfers(None)
            .await?
            .into_iter()
            .filter(|entry| !entry.status.is_final())
            .collect();
        let mut results = Vec::with_capacity(open.len());

        for entry in open {
            let _company_lock = self.locks.lock(entry.company_id).await;

            // Another recovery may have finished it while we waited.
            let Some(current) = self.repo.get_transfer(entry.id).await? else {
                continue;
            };
            if current.status.is_final() {
                continue;
            }

            info!(transfer_id = %current.id, status = %current.status, "Re-driving interrupted transfer");
            let transfer_id = current.id;
            let outcome = match current.status {
                TransferStatus::Pending => self.settle(current).await,
                _ => self.hand_over(current).await,
            };
            results.push(RecoveryResult {
                transfer_id,
                outcome,
            });
        }

        Ok(results)
    }

    /// Charge the buyer for a journaled transfer, then deliver the units.
    async fn settle(&self, mut transfer: StockTransfer) -> Result<StockTransfer, AppError> {
        let payment = self
            .funds
            .transfer_funds(
                transfer.buyer_id,
                transfer.seller_id,
                transfer.total_price,
                PaymentKey::Purchase(transfer.id),
            )
            .await;

        if let Err(e) = payment {
            warn!(
                transfer_id = %transfer.id,
                buyer_id = transfer.buyer_id,
                amount = %format_funds(transfer.total_price),
                error = %e,
                "Payment failed, no shares moved"
            );
            self.record(&mut transfer, TransferStatus::Failed, Some(e.to_string()))
                .await?;
            return Err(AppError::FundsTransferFailed(e));
        }
        self.record(&mut transfer, TransferStatus::Funded, None).await?;

        self.hand_over(transfer).await
    }

    /// Select and reassign the share units of a paid transfer, refunding the
    /// price of any unit that could not be moved.
    async fn hand_over(&self, mut transfer: StockTransfer) -> Result<StockTransfer, AppError> {
        let quantity = usize::try_from(transfer.quantity)
            .map_err(|_| AppError::InvalidQuantity(transfer.quantity))?;

        if !transfer.has_selection() {
            let units = self
                .ledger
                .holding_units(transfer.seller_id, transfer.company_id)
                .await?;
            let selection = select_for_sale(&units, transfer.company_id, quantity);
            transfer.stock_ids = self.repo.claim_selection(transfer.id, &selection).await?;
        }

        let guard = ReassignGuard {
            from_owner: transfer.seller_id,
            company_id: transfer.company_id,
            transfer_id: transfer.id,
        };
        let report = self
            .ledger
            .guarded_reassign(&transfer.stock_ids, transfer.buyer_id, guard)
            .await;

        let shortfall = quantity.saturating_sub(transfer.stock_ids.len());
        if report.is_complete() && shortfall == 0 {
            self.record(&mut transfer, TransferStatus::Completed, None)
                .await?;
            info!(
                transfer_id = %transfer.id,
                seller_id = transfer.seller_id,
                buyer_id = transfer.buyer_id,
                company_id = transfer.company_id,
                quantity = transfer.quantity,
                total = %format_funds(transfer.total_price),
                "Stocks successfully transferred"
            );
            return Ok(transfer);
        }

        let unmoved = report.failed.len() + shortfall;
        let failure = format!(
            "{} of {} share unit(s) could not be reassigned",
            unmoved, transfer.quantity
        );
        let refund = i64::try_from(unmoved)
            .ok()
            .and_then(|n| total_price(transfer.unit_price, n));

        let refunded = match refund {
            Some(amount) => match self
                .funds
                .transfer_funds(
                    transfer.seller_id,
                    transfer.buyer_id,
                    amount,
                    PaymentKey::Refund(transfer.id),
                )
                .await
            {
                Ok(()) => Some(amount),
                Err(e) => {
                    error!(transfer_id = %transfer.id, error = %e, "Refund failed");
                    None
                }
            },
            None => None,
        };

        match refunded {
            Some(amount) => {
                warn!(
                    transfer_id = %transfer.id,
                    refunded = %format_funds(amount),
                    unmoved,
                    "Partial transfer compensated"
                );
                self.record(&mut transfer, TransferStatus::Compensated, Some(failure))
                    .await?;
            }
            None => {
                // Left funded so recovery retries the hand-over and the refund.
                self.record(
                    &mut transfer,
                    TransferStatus::Funded,
                    Some(format!("{}; refund pending", failure)),
                )
                .await?;
            }
        }

        Err(AppError::PartialReassignmentFailure {
            succeeded: report.succeeded,
            failed: report.failed,
            refunded,
        })
    }

    async fn record(
        &self,
        transfer: &mut StockTransfer,
        status: TransferStatus,
        failure: Option<String>,
    ) -> Result<(), AppError> {
        transfer.status = status;
        if failure.is_some() {
            transfer.failure = failure;
        }
        transfer.updated_at = Utc::now();
        self.repo.update_transfer(transfer).await?;
        Ok(())
    }
}
