mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use common::{Market, test_repository, test_service};
use rust_decimal_macros::dec;
use sharebook::application::{
    AppError, ExchangeService, FixedPrice, FundsError, FundsService, PriceResolver, UserFunds,
};
use sharebook::domain::{
    CompanyId, Funds, PaymentKey, StockTransfer, TransferRequest, TransferStatus, UserId,
};
use sharebook::storage::ReassignGuard;

/// Price resolver that knows no quote at all.
struct NoQuote;

#[async_trait]
impl PriceResolver for NoQuote {
    async fn stock_price(&self, _company_id: CompanyId) -> anyhow::Result<Option<Funds>> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_sale_moves_funds_and_lowest_units() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Market::setup(&service, 5, dec!(10), dec!(100)).await?;
    let units: Vec<_> = service.ledger().get_stocks().await?.iter().map(|s| s.id).collect();

    let request = TransferRequest::new(market.seller, market.buyer, market.company, 3);
    let transfer = service.transfer_ownership(request).await?;

    assert_eq!(transfer.status, TransferStatus::Completed);
    assert_eq!(transfer.unit_price, dec!(10));
    assert_eq!(transfer.total_price, dec!(30));
    assert_eq!(transfer.stock_ids, units[..3].to_vec());

    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(70));
    assert_eq!(service.get_user(market.seller).await?.funds, dec!(30));

    let ledger = service.ledger();
    assert_eq!(ledger.holdings(market.buyer, market.company).await?, 3);
    assert_eq!(ledger.holdings(market.seller, market.company).await?, 2);
    let seller_units = ledger.holding_units(market.seller, market.company).await?;
    assert_eq!(
        seller_units.iter().map(|s| s.id).collect::<Vec<_>>(),
        units[3..].to_vec()
    );

    let journaled = service.get_transfer(transfer.id).await?;
    assert_eq!(journaled.status, TransferStatus::Completed);
    assert_eq!(journaled.stock_ids, transfer.stock_ids);

    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_caller_supplied_price() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Market::setup(&service, 2, dec!(10), dec!(100)).await?;

    let request = TransferRequest::new(market.seller, market.buyer, market.company, 2);
    let transfer = service
        .transfer_ownership_with(request, &FixedPrice(dec!(12.5)))
        .await?;

    assert_eq!(transfer.total_price, dec!(25));
    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(75));

    Ok(())
}

#[tokio::test]
async fn test_rejected_requests_move_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Market::setup(&service, 5, dec!(10), dec!(100)).await?;

    let err = service
        .transfer_ownership(TransferRequest::new(market.seller, market.seller, market.company, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SelfTransfer(id) if id == market.seller));

    let err = service
        .transfer_ownership(TransferRequest::new(market.seller, market.buyer, market.company, 6))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientShares { owned: 5, requested: 6, .. }
    ));

    let err = service
        .transfer_ownership(TransferRequest::new(market.seller, market.buyer, market.company, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuantity(0)));

    let err = service
        .transfer_ownership_with(
            TransferRequest::new(market.seller, market.buyer, market.company, 1),
            &FixedPrice(Funds::ZERO),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PriceUnavailable(id) if id == market.company));

    let err = service
        .transfer_ownership_with(
            TransferRequest::new(market.seller, market.buyer, market.company, 1),
            &NoQuote,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PriceUnavailable(id) if id == market.company));

    let err = service
        .transfer_ownership(TransferRequest::new(market.seller, 999, market.company, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound(999)));

    let err = service
        .transfer_ownership(TransferRequest::new(999, market.buyer, market.company, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound(999)));

    // Validation failures never reach the journal
    assert!(service.list_transfers(None).await?.is_empty());
    assert_eq!(service.ledger().holdings(market.seller, market.company).await?, 5);
    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(100));

    Ok(())
}

#[tokio::test]
async fn test_failed_payment_is_journaled() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Market::setup(&service, 5, dec!(10), dec!(20)).await?;

    let err = service
        .transfer_ownership(TransferRequest::new(market.seller, market.buyer, market.company, 3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::FundsTransferFailed(FundsError::InsufficientFunds { .. })
    ));

    assert_eq!(service.ledger().holdings(market.seller, market.company).await?, 5);
    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(20));
    assert_eq!(service.get_user(market.seller).await?.funds, dec!(0));

    let failed = service.list_transfers(Some(TransferStatus::Failed)).await?;
    assert_eq!(failed.len(), 1);
    assert!(failed[0].failure.is_some());
    assert!(failed[0].stock_ids.is_empty());

    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_concurrent_sales_never_oversell() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Market::setup(&service, 5, dec!(10), dec!(100)).await?;

    let first = TransferRequest::new(market.seller, market.buyer, market.company, 3);
    let second = TransferRequest::new(market.seller, market.other, market.company, 3);
    let (a, b) = tokio::join!(
        service.transfer_ownership(first),
        service.transfer_ownership(second)
    );

    let outcomes = [a, b];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(AppError::InsufficientShares { owned: 2, requested: 3, .. })
    )));

    let ledger = service.ledger();
    assert_eq!(ledger.holdings(market.seller, market.company).await?, 2);
    assert_eq!(ledger.get_total_stocks_from_company(market.company).await?, 5);
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_concurrent_sales_to_one_buyer_across_services() -> Result<()> {
    let (repo, first, _temp) = test_repository().await?;
    let second = ExchangeService::new(repo.clone());
    let market = Market::setup(&first, 5, dec!(10), dec!(100)).await?;

    // Separate services hold separate company locks
    let request = TransferRequest::new(market.seller, market.buyer, market.company, 3);
    let (a, b) = tokio::join!(
        first.transfer_ownership(request),
        second.transfer_ownership(request)
    );
    assert!(!(a.is_ok() && b.is_ok()), "six units sold out of five");

    let delivered: Vec<_> = a
        .iter()
        .chain(b.iter())
        .flat_map(|t| t.stock_ids.clone())
        .collect();
    let unique: HashSet<_> = delivered.iter().collect();
    assert_eq!(unique.len(), delivered.len());

    // The buyer pays for exactly the units they hold
    let held = first.ledger().holdings(market.buyer, market.company).await?;
    let buyer = first.get_user(market.buyer).await?;
    let seller = first.get_user(market.seller).await?;
    assert_eq!(buyer.funds, dec!(100) - dec!(10) * Funds::from(held));
    assert_eq!(seller.funds, dec!(10) * Funds::from(held));
    assert_eq!(first.ledger().get_total_stocks_from_company(market.company).await?, 5);
    assert!(first.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_buyer_units_from_another_sale_are_not_delivered_again() -> Result<()> {
    let (repo, service, _temp) = test_repository().await?;
    let market = Market::setup(&service, 3, dec!(10), dec!(100)).await?;

    let earlier = service
        .transfer_ownership(TransferRequest::new(market.seller, market.buyer, market.company, 1))
        .await?;
    let sold = earlier.stock_ids[0];
    let remaining: Vec<_> = service
        .ledger()
        .holding_units(market.seller, market.company)
        .await?
        .iter()
        .map(|s| s.id)
        .collect();

    // A paid sale whose stale selection includes the unit the buyer already got
    let request = TransferRequest::new(market.seller, market.buyer, market.company, 2);
    let mut entry = StockTransfer::new(&request, dec!(10), dec!(20));
    entry.status = TransferStatus::Funded;
    entry.stock_ids = vec![sold, remaining[0]];
    repo.save_transfer(&entry).await?;

    let results = service.recover_transfers().await?;
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        Err(AppError::PartialReassignmentFailure {
            succeeded,
            failed,
            refunded,
        }) => {
            assert_eq!(succeeded, &vec![remaining[0]]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].stock_id, sold);
            assert_eq!(*refunded, Some(dec!(10)));
        }
        other => panic!("expected partial failure, got {:?}", other.as_ref().err()),
    }

    assert_eq!(service.ledger().holdings(market.buyer, market.company).await?, 2);
    assert_eq!(
        service.get_transfer(entry.id).await?.status,
        TransferStatus::Compensated
    );

    Ok(())
}

#[tokio::test]
async fn test_recover_completes_funded_transfer() -> Result<()> {
    let (repo, service, _temp) = test_repository().await?;
    let market = Market::setup(&service, 4, dec!(10), dec!(100)).await?;
    let units: Vec<_> = service.ledger().get_stocks().await?.iter().map(|s| s.id).collect();

    // Paid, then interrupted before any unit moved
    let request = TransferRequest::new(market.seller, market.buyer, market.company, 2);
    let mut entry = StockTransfer::new(&request, dec!(10), dec!(20));
    entry.status = TransferStatus::Funded;
    entry.stock_ids = units[..2].to_vec();
    repo.save_transfer(&entry).await?;

    // The first unit was handed over before the interruption
    let guard = ReassignGuard {
        from_owner: market.seller,
        company_id: market.company,
        transfer_id: entry.id,
    };
    assert!(repo.reassign_stock(units[0], market.buyer, Some(guard)).await?);

    let report = service.check_integrity().await?;
    assert!(!report.is_healthy());

    let results = service.recover_transfers().await?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].transfer_id, entry.id);
    let recovered = results[0].outcome.as_ref().expect("recovery should succeed");
    assert_eq!(recovered.status, TransferStatus::Completed);
    assert_eq!(recovered.stock_ids, units[..2].to_vec());

    assert_eq!(service.ledger().holdings(market.buyer, market.company).await?, 2);
    assert_eq!(
        service.get_transfer(entry.id).await?.status,
        TransferStatus::Completed
    );

    // Nothing left to do
    assert!(service.recover_transfers().await?.is_empty());
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_unmovable_units_are_refunded() -> Result<()> {
    let (repo, service, _temp) = test_repository().await?;
    let market = Market::setup(&service, 2, dec!(10), dec!(100)).await?;
    service.deposit(market.seller, dec!(50)).await?;
    let foreign = service.issue_shares(market.company, market.other, 1).await?;
    let mut selected: Vec<_> = service
        .ledger()
        .holding_units(market.seller, market.company)
        .await?
        .iter()
        .map(|s| s.id)
        .collect();
    selected.extend(foreign);

    // The selection includes a unit the seller no longer holds
    let request = TransferRequest::new(market.seller, market.buyer, market.company, 3);
    let mut entry = StockTransfer::new(&request, dec!(10), dec!(30));
    entry.status = TransferStatus::Funded;
    entry.stock_ids = selected;
    repo.save_transfer(&entry).await?;

    let results = service.recover_transfers().await?;
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        Err(AppError::PartialReassignmentFailure {
            succeeded,
            failed,
            refunded,
        }) => {
            assert_eq!(succeeded.len(), 2);
            assert_eq!(failed.len(), 1);
            assert_eq!(*refunded, Some(dec!(10)));
        }
        other => panic!("expected partial failure, got {:?}", other.as_ref().err()),
    }

    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(110));
    assert_eq!(service.get_user(market.seller).await?.funds, dec!(40));
    assert_eq!(service.ledger().holdings(market.buyer, market.company).await?, 2);
    assert_eq!(service.ledger().holdings(market.other, market.company).await?, 1);

    let journaled = service.get_transfer(entry.id).await?;
    assert_eq!(journaled.status, TransferStatus::Compensated);
    assert!(journaled.failure.is_some());
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_recover_pays_and_delivers_unpaid_transfer() -> Result<()> {
    let (repo, service, _temp) = test_repository().await?;
    let market = Market::setup(&service, 1, dec!(10), dec!(100)).await?;

    // Journaled, then interrupted before the payment
    let request = TransferRequest::new(market.seller, market.buyer, market.company, 1);
    let entry = StockTransfer::new(&request, dec!(10), dec!(10));
    repo.save_transfer(&entry).await?;

    let report = service.check_integrity().await?;
    assert!(report.issues.iter().any(|i| i.contains("never paid")));

    let results = service.recover_transfers().await?;
    assert_eq!(results.len(), 1);
    assert!(results[0].outcome.is_ok());

    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(90));
    assert_eq!(service.get_user(market.seller).await?.funds, dec!(10));
    assert_eq!(service.ledger().holdings(market.buyer, market.company).await?, 1);
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_payment_commit_marks_entry_funded_once() -> Result<()> {
    let (repo, service, _temp) = test_repository().await?;
    let market = Market::setup(&service, 2, dec!(10), dec!(100)).await?;
    let funds = UserFunds::new(repo.clone());

    let request = TransferRequest::new(market.seller, market.buyer, market.company, 2);
    let entry = StockTransfer::new(&request, dec!(10), dec!(20));
    repo.save_transfer(&entry).await?;

    // Paid, then the caller went away before journaling anything else
    let key = PaymentKey::Purchase(entry.id);
    funds
        .transfer_funds(market.buyer, market.seller, dec!(20), key)
        .await?;
    assert_eq!(
        service.get_transfer(entry.id).await?.status,
        TransferStatus::Funded
    );

    // Repeating the key moves nothing
    funds
        .transfer_funds(market.buyer, market.seller, dec!(20), key)
        .await?;
    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(80));

    let results = service.recover_transfers().await?;
    assert_eq!(results.len(), 1);
    let recovered = results[0].outcome.as_ref().expect("recovery should succeed");
    assert_eq!(recovered.status, TransferStatus::Completed);

    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(80));
    assert_eq!(service.get_user(market.seller).await?.funds, dec!(20));
    assert_eq!(service.ledger().holdings(market.buyer, market.company).await?, 2);

    Ok(())
}

/// Funds service that accepts every payment key once without touching balances.
#[derive(Default)]
struct CountingFunds {
    applied: Mutex<HashSet<PaymentKey>>,
}

#[async_trait]
impl FundsService for CountingFunds {
    async fn transfer_funds(
        &self,
        _from: UserId,
        _to: UserId,
        amount: Funds,
        key: PaymentKey,
    ) -> Result<(), FundsError> {
        if amount <= Funds::ZERO {
            return Err(FundsError::InvalidAmount(amount));
        }
        self.applied.lock().unwrap().insert(key);
        Ok(())
    }
}

#[tokio::test]
async fn test_custom_funds_service() -> Result<()> {
    let (repo, _service, _temp) = test_repository().await?;
    let funds = Arc::new(CountingFunds::default());
    let service = ExchangeService::with_funds_service(repo, funds.clone());
    let market = Market::setup(&service, 3, dec!(10), dec!(0)).await?;

    let transfer = service
        .transfer_ownership(TransferRequest::new(market.seller, market.buyer, market.company, 3))
        .await?;

    assert_eq!(transfer.status, TransferStatus::Completed);
    let applied = funds.applied.lock().unwrap().clone();
    assert_eq!(applied, HashSet::from([PaymentKey::Purchase(transfer.id)]));
    assert_eq!(service.get_user(market.buyer).await?.funds, dec!(0));
    assert_eq!(service.ledger().holdings(market.buyer, market.company).await?, 3);

    Ok(())
}
