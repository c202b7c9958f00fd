use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::ExchangeService;
use crate::domain::{format_funds, Company, Stock, StockTransfer, User};

/// Database snapshot for full export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub users: Vec<User>,
    pub companies: Vec<Company>,
    pub stocks: Vec<Stock>,
    pub transfers: Vec<StockTransfer>,
}

/// Exporter for converting exchange data to various formats
pub struct Exporter<'a> {
    service: &'a ExchangeService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a ExchangeService) -> Self {
        Self { service }
    }

    /// Export holdings (owned count per owner and company) to CSV format
    pub async fn export_holdings_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let groups = self.service.ledger().get_stocks_by_owner().await?;
        let users: HashMap<_, _> = self
            .service
            .list_users()
            .await?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();
        let companies: HashMap<_, _> = self
            .service
            .list_companies()
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["owner_id", "owner", "company_id", "company", "owned"])?;

        for group in &groups {
            csv_writer.write_record([
                group.owner_id.to_string(),
                users.get(&group.owner_id).cloned().unwrap_or_default(),
                group.company_id.to_string(),
                companies.get(&group.company_id).cloned().unwrap_or_default(),
                group.owned.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(groups.len())
    }

    /// Export every share unit to CSV format
    pub async fn export_stocks_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let stocks = self.service.ledger().get_stocks().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["id", "owner_id", "company_id"])?;

        for stock in &stocks {
            csv_writer.write_record([
                stock.id.to_string(),
                stock.owner_id.to_string(),
                stock.company_id.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(stocks.len())
    }

    /// Export the transfer journal to CSV format
    pub async fn export_transfers_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let transfers = self.service.list_transfers(None).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "created_at",
            "seller_id",
            "buyer_id",
            "company_id",
            "quantity",
            "unit_price",
            "total_price",
            "status",
            "stock_ids",
            "failure",
        ])?;

        for transfer in &transfers {
            csv_writer.write_record([
                transfer.id.to_string(),
                transfer.created_at.to_rfc3339(),
                transfer.seller_id.to_string(),
                transfer.buyer_id.to_string(),
                transfer.company_id.to_string(),
                transfer.quantity.to_string(),
                format_funds(transfer.unit_price),
                format_funds(transfer.total_price),
                transfer.status.to_string(),
                transfer
                    .stock_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(";"),
                transfer.failure.clone().unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transfers.len())
    }

    /// Export full database as JSON snapshot. Passwords are never exported.
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<DatabaseSnapshot> {
        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            users: self.service.list_users().await?,
            companies: self.service.list_companies().await?,
            stocks: self.service.ledger().get_stocks().await?,
            transfers: self.service.list_transfers(None).await?,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
