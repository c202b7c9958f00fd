use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    format_funds, parse_funds, Company, CompanyId, Funds, GroupBy, NewUser, OwnershipGroup,
    PaymentKey, ShareCount, Stock, StockField, StockId, StockTransfer, TransferId, TransferStatus,
    User, UserId,
};

use super::{
    MIGRATIONS_DOWN, MIGRATION_001_USERS, MIGRATION_002_COMPANIES_STOCKS,
    MIGRATION_003_STOCK_TRANSFERS, MIGRATION_004_PAYMENTS,
};

/// Statistics for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub user_count: i64,
    pub stock_count: i64,
    pub share_counts: Vec<ShareCount>,
    pub orphaned_stocks: i64,
    /// Paid for but not completed
    pub unfinished_transfers: i64,
    /// Journaled but not paid yet
    pub unpaid_transfers: i64,
}

/// Outcome of moving funds between two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundsMove {
    Moved {
        sender_balance: Funds,
        recipient_balance: Funds,
    },
    SenderMissing,
    RecipientMissing,
    Insufficient {
        balance: Funds,
    },
    /// The payment key was applied before; nothing moved this time.
    AlreadyApplied,
}

/// Restricts a reassignment to rows still held by `from_owner` in `company_id`.
/// A row already owned by the new owner only matches when this same transfer
/// moved it, so a re-drive is harmless but another sale's units never count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassignGuard {
    pub from_owner: UserId,
    pub company_id: CompanyId,
    pub transfer_id: TransferId,
}

/// Repository for persisting and querying users, companies, share units and
/// the transfer journal.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL (e.g. `sqlite:trading.db?mode=rwc`).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations. Every migration is idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_USERS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::raw_sql(MIGRATION_002_COMPANIES_STOCKS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        sqlx::raw_sql(MIGRATION_003_STOCK_TRANSFERS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 003")?;

        sqlx::raw_sql(MIGRATION_004_PAYMENTS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 004")?;

        Ok(())
    }

    /// Revert every migration, newest first.
    pub async fn rollback(&self) -> Result<()> {
        for sql in MIGRATIONS_DOWN {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .context("Failed to revert migration")?;
        }
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Returns true if a table with the given name exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) as count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to inspect schema")?
        .get("count");
        Ok(count > 0)
    }

    // ========================
    // User operations
    // ========================

    /// Save a new user and return it with its assigned id.
    pub async fn insert_user(&self, new_user: &NewUser) -> Result<User> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO users (name, email, password, is_root, risk, funds, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password)
        .bind(new_user.is_root)
        .bind(new_user.risk)
        .bind(format_funds(new_user.funds))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to save user")?;

        Ok(User {
            id: row.get("id"),
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            password: new_user.password.clone(),
            is_root: new_user.is_root,
            risk: new_user.risk,
            funds: new_user.funds,
            created_at: Some(now),
            updated_at: now,
        })
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, password, is_root, risk, funds, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    /// Get a user by email.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, password, is_root, risk, funds, created_at, updated_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by email")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    /// List all users, ordered by id.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, name, email, password, is_root, risk, funds, created_at, updated_at FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        rows.iter().map(Self::row_to_user).collect()
    }

    /// Move `amount` from one user's funds to another's in a single transaction.
    ///
    /// The payment key is recorded in the same commit and a key is applied at
    /// most once. A purchase also marks its pending journal entry funded, so a
    /// `pending` entry always means the buyer has not paid.
    pub async fn move_funds(
        &self,
        from: UserId,
        to: UserId,
        amount: Funds,
        key: PaymentKey,
    ) -> Result<FundsMove> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin funds transaction")?;

        // Writing first takes the database write lock before balances are read.
        sqlx::query("UPDATE users SET updated_at = ? WHERE id IN (?, ?)")
            .bind(&now)
            .bind(from)
            .bind(to)
            .execute(&mut *tx)
            .await
            .context("Failed to lock users for funds transfer")?;

        let recorded = sqlx::query(
            r#"
            INSERT OR IGNORE INTO payments (payment_key, transfer_id, from_id, to_id, amount, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(key.to_string())
        .bind(key.transfer_id().to_string())
        .bind(from)
        .bind(to)
        .bind(format_funds(amount))
        .bind(&now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to record payment {}", key))?
        .rows_affected();
        if recorded == 0 {
            return Ok(FundsMove::AlreadyApplied);
        }

        let Some(sender_balance) = Self::fetch_funds(&mut *tx, from).await? else {
            return Ok(FundsMove::SenderMissing);
        };
        let Some(recipient_balance) = Self::fetch_funds(&mut *tx, to).await? else {
            return Ok(FundsMove::RecipientMissing);
        };

        if sender_balance < amount {
            return Ok(FundsMove::Insufficient {
                balance: sender_balance,
            });
        }

        let sender_balance = sender_balance - amount;
        let recipient_balance = recipient_balance
            .checked_add(amount)
            .context("Recipient balance overflow")?;

        Self::store_funds(&mut *tx, from, sender_balance).await?;
        Self::store_funds(&mut *tx, to, recipient_balance).await?;

        if let PaymentKey::Purchase(transfer_id) = key {
            sqlx::query(
                "UPDATE stock_transfers SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(TransferStatus::Funded.as_str())
            .bind(&now)
            .bind(transfer_id.to_string())
            .bind(TransferStatus::Pending.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to mark transfer funded")?;
        }

        tx.commit()
            .await
            .context("Failed to commit funds transfer")?;

        Ok(FundsMove::Moved {
            sender_balance,
            recipient_balance,
        })
    }

    /// Add `amount` to a user's funds. Returns the new balance, or None if the
    /// user does not exist.
    pub async fn add_funds(&self, user_id: UserId, amount: Funds) -> Result<Option<Funds>> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin deposit transaction")?;

        let touched = sqlx::query("UPDATE users SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to lock user for deposit")?
            .rows_affected();
        if touched == 0 {
            return Ok(None);
        }

        let balance = Self::fetch_funds(&mut *tx, user_id)
            .await?
            .context("User vanished during deposit")?;
        let balance = balance.checked_add(amount).context("Balance overflow")?;
        Self::store_funds(&mut *tx, user_id, balance).await?;

        tx.commit().await.context("Failed to commit deposit")?;
        Ok(Some(balance))
    }

    async fn fetch_funds(conn: &mut SqliteConnection, user_id: UserId) -> Result<Option<Funds>> {
        let row = sqlx::query("SELECT funds FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to read funds")?;

        row.map(|row| {
            let funds: String = row.get("funds");
            parse_funds(&funds).with_context(|| format!("Invalid funds for user {}", user_id))
        })
        .transpose()
    }

    async fn store_funds(conn: &mut SqliteConnection, user_id: UserId, funds: Funds) -> Result<()> {
        sqlx::query("UPDATE users SET funds = ? WHERE id = ?")
            .bind(format_funds(funds))
            .bind(user_id)
            .execute(&mut *conn)
            .await
            .context("Failed to write funds")?;
        Ok(())
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let funds_str: String = row.get("funds");
        let created_at_str: Option<String> = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(User {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            password: row.get("password"),
            is_root: row.get::<i32, _>("is_root") != 0,
            risk: row.get("risk"),
            funds: parse_funds(&funds_str).context("Invalid funds")?,
            created_at: created_at_str
                .map(|s| parse_timestamp(&s))
                .transpose()
                .context("Invalid created_at timestamp")?,
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
        })
    }

    // ========================
    // Company operations
    // ========================

    /// Save a new company with no issued share units.
    pub async fn insert_company(&self, name: &str, stock_price: Funds) -> Result<Company> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO companies (name, stock_price, issued_shares, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(format_funds(stock_price))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to save company")?;

        Ok(Company {
            id: row.get("id"),
            name: name.to_string(),
            stock_price,
            issued_shares: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a company by ID.
    pub async fn get_company(&self, id: CompanyId) -> Result<Option<Company>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, stock_price, issued_shares, created_at, updated_at
            FROM companies
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch company")?;

        row.as_ref().map(Self::row_to_company).transpose()
    }

    /// Get a company by name.
    pub async fn get_company_by_name(&self, name: &str) -> Result<Option<Company>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, stock_price, issued_shares, created_at, updated_at
            FROM companies
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch company by name")?;

        row.as_ref().map(Self::row_to_company).transpose()
    }

    /// List all companies, ordered by id.
    pub async fn list_companies(&self) -> Result<Vec<Company>> {
        let rows = sqlx::query(
            "SELECT id, name, stock_price, issued_shares, created_at, updated_at FROM companies ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list companies")?;

        rows.iter().map(Self::row_to_company).collect()
    }

    /// Update the quoted stock price. Returns false if the company does not exist.
    pub async fn update_stock_price(&self, id: CompanyId, stock_price: Funds) -> Result<bool> {
        let result = sqlx::query("UPDATE companies SET stock_price = ?, updated_at = ? WHERE id = ?")
            .bind(format_funds(stock_price))
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update stock price")?;
        Ok(result.rows_affected() == 1)
    }

    /// Issue `count` new share units of a company to `owner_id`.
    /// The units and the company's issued total are written in one transaction.
    pub async fn issue_shares(
        &self,
        company_id: CompanyId,
        owner_id: UserId,
        count: i64,
    ) -> Result<Vec<StockId>> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin issuance transaction")?;

        let updated = sqlx::query(
            "UPDATE companies SET issued_shares = issued_shares + ?, updated_at = ? WHERE id = ?",
        )
        .bind(count)
        .bind(&now)
        .bind(company_id)
        .execute(&mut *tx)
        .await
        .context("Failed to update issued shares")?
        .rows_affected();
        if updated == 0 {
            anyhow::bail!("Company {} not found", company_id);
        }

        let mut ids = Vec::new();
        for _ in 0..count {
            let row = sqlx::query(
                r#"
                INSERT INTO stocks (owner_id, company_id, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(owner_id)
            .bind(company_id)
            .bind(&now)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to issue share unit")?;
            ids.push(row.get("id"));
        }

        tx.commit().await.context("Failed to commit issuance")?;
        Ok(ids)
    }

    fn row_to_company(row: &SqliteRow) -> Result<Company> {
        let price_str: String = row.get("stock_price");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(Company {
            id: row.get("id"),
            name: row.get("name"),
            stock_price: parse_funds(&price_str).context("Invalid stock price")?,
            issued_shares: row.get("issued_shares"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
        })
    }

    // ========================
    // Share unit operations
    // ========================

    /// List all share units, ordered by id.
    pub async fn list_stocks(&self) -> Result<Vec<Stock>> {
        let rows = sqlx::query("SELECT id, owner_id, company_id FROM stocks ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list stocks")?;

        Ok(rows.iter().map(Self::row_to_stock).collect())
    }

    /// List share units whose `field` equals `value`, ordered by id.
    pub async fn find_stocks(&self, field: StockField, value: i64) -> Result<Vec<Stock>> {
        // The column name comes from a closed enum, never from caller input.
        let query = format!(
            "SELECT id, owner_id, company_id FROM stocks WHERE {} = ? ORDER BY id",
            field.column()
        );

        let rows = sqlx::query(&query)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to find stocks by {}", field))?;

        Ok(rows.iter().map(Self::row_to_stock).collect())
    }

    /// List the share units one owner holds in one company, ordered by id.
    pub async fn find_holdings(&self, owner_id: UserId, company_id: CompanyId) -> Result<Vec<Stock>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, company_id
            FROM stocks
            WHERE owner_id = ? AND company_id = ?
            ORDER BY id
            "#,
        )
        .bind(owner_id)
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to find holdings")?;

        Ok(rows.iter().map(Self::row_to_stock).collect())
    }

    /// Count share units per (owner, company) using SQL aggregation.
    /// With `only`, restricts the result to one value of the primary grouping column.
    pub async fn group_stocks(&self, group_by: GroupBy, only: Option<i64>) -> Result<Vec<OwnershipGroup>> {
        let (primary, secondary) = group_by.columns();

        let mut query = String::from("SELECT owner_id, company_id, COUNT(id) as owned FROM stocks");
        if only.is_some() {
            query.push_str(&format!(" WHERE {} = ?", primary));
        }
        query.push_str(&format!(
            " GROUP BY {primary}, {secondary} ORDER BY {primary}, {secondary}"
        ));

        let mut sql_query = sqlx::query(&query);
        if let Some(value) = only {
            sql_query = sql_query.bind(value);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to group stocks")?;

        Ok(rows
            .iter()
            .map(|row| OwnershipGroup {
                owner_id: row.get("owner_id"),
                company_id: row.get("company_id"),
                owned: row.get("owned"),
            })
            .collect())
    }

    /// Set the owner of one share unit, keeping its company.
    /// Returns false when no row matched (missing row or failed guard).
    pub async fn reassign_stock(
        &self,
        stock_id: StockId,
        new_owner: UserId,
        guard: Option<ReassignGuard>,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = match guard {
            None => {
                sqlx::query("UPDATE stocks SET owner_id = ?, updated_at = ? WHERE id = ?")
                    .bind(new_owner)
                    .bind(&now)
                    .bind(stock_id)
                    .execute(&self.pool)
                    .await
            }
            Some(guard) => {
                let transfer_id = guard.transfer_id.to_string();
                sqlx::query(
                    r#"
                    UPDATE stocks
                    SET owner_id = ?, moved_by = ?, updated_at = ?
                    WHERE id = ? AND company_id = ?
                      AND (owner_id = ? OR (owner_id = ? AND moved_by = ?))
                    "#,
                )
                .bind(new_owner)
                .bind(&transfer_id)
                .bind(&now)
                .bind(stock_id)
                .bind(guard.company_id)
                .bind(guard.from_owner)
                .bind(new_owner)
                .bind(&transfer_id)
                .execute(&self.pool)
                .await
            }
        }
        .with_context(|| format!("Failed to reassign stock {}", stock_id))?;

        Ok(result.rows_affected() == 1)
    }

    fn row_to_stock(row: &SqliteRow) -> Stock {
        Stock {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            company_id: row.get("company_id"),
        }
    }

    // ========================
    // Transfer journal operations
    // ========================

    /// Save a new journal entry.
    pub async fn save_transfer(&self, transfer: &StockTransfer) -> Result<()> {
        let stock_ids_json = serde_json::to_string(&transfer.stock_ids)?;

        sqlx::query(
            r#"
            INSERT INTO stock_transfers (id, seller_id, buyer_id, company_id, quantity, unit_price, total_price, status, stock_ids, failure, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer.id.to_string())
        .bind(transfer.seller_id)
        .bind(transfer.buyer_id)
        .bind(transfer.company_id)
        .bind(transfer.quantity)
        .bind(format_funds(transfer.unit_price))
        .bind(format_funds(transfer.total_price))
        .bind(transfer.status.as_str())
        .bind(&stock_ids_json)
        .bind(&transfer.failure)
        .bind(transfer.created_at.to_rfc3339())
        .bind(transfer.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save transfer")?;

        Ok(())
    }

    /// Persist the mutable parts of a journal entry: status, selection, failure.
    /// Entries that already reached a final status are left untouched.
    pub async fn update_transfer(&self, transfer: &StockTransfer) -> Result<()> {
        let stock_ids_json = serde_json::to_string(&transfer.stock_ids)?;

        sqlx::query(
            r#"
            UPDATE stock_transfers
            SET status = ?, stock_ids = ?, failure = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'funded')
            "#,
        )
        .bind(transfer.status.as_str())
        .bind(&stock_ids_json)
        .bind(&transfer.failure)
        .bind(transfer.updated_at.to_rfc3339())
        .bind(transfer.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update transfer")?;

        Ok(())
    }

    /// Store `stock_ids` as the entry's selection unless one is already stored,
    /// and return the stored selection. Concurrent drives of one transfer thus
    /// agree on the same units.
    pub async fn claim_selection(&self, id: TransferId, stock_ids: &[StockId]) -> Result<Vec<StockId>> {
        let stock_ids_json = serde_json::to_string(stock_ids)?;

        sqlx::query(
            "UPDATE stock_transfers SET stock_ids = ?, updated_at = ? WHERE id = ? AND stock_ids = '[]'",
        )
        .bind(&stock_ids_json)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to store transfer selection")?;

        let stored: String = sqlx::query("SELECT stock_ids FROM stock_transfers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read transfer selection")?
            .with_context(|| format!("Transfer {} not found", id))?
            .get("stock_ids");
        serde_json::from_str(&stored).context("Invalid stored selection")
    }

    /// Get a journal entry by ID.
    pub async fn get_transfer(&self, id: TransferId) -> Result<Option<StockTransfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, seller_id, buyer_id, company_id, quantity, unit_price, total_price, status, stock_ids, failure, created_at, updated_at
            FROM stock_transfers
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch transfer")?;

        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    /// List journal entries, oldest first, optionally restricted to one status.
    pub async fn list_transfers(&self, status: Option<TransferStatus>) -> Result<Vec<StockTransfer>> {
        let mut query = String::from(
            "SELECT id, seller_id, buyer_id, company_id, quantity, unit_price, total_price, status, stock_ids, failure, created_at, updated_at FROM stock_transfers",
        );
        if status.is_some() {
            query.push_str(" WHERE status = ?");
        }
        query.push_str(" ORDER BY created_at, id");

        let mut sql_query = sqlx::query(&query);
        if let Some(status) = status {
            sql_query = sql_query.bind(status.as_str());
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transfers")?;

        rows.iter().map(Self::row_to_transfer).collect()
    }

    fn row_to_transfer(row: &SqliteRow) -> Result<StockTransfer> {
        let id_str: String = row.get("id");
        let unit_price_str: String = row.get("unit_price");
        let total_price_str: String = row.get("total_price");
        let status_str: String = row.get("status");
        let stock_ids_json: String = row.get("stock_ids");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(StockTransfer {
            id: Uuid::parse_str(&id_str).context("Invalid transfer ID")?,
            seller_id: row.get("seller_id"),
            buyer_id: row.get("buyer_id"),
            company_id: row.get("company_id"),
            quantity: row.get("quantity"),
            unit_price: parse_funds(&unit_price_str).context("Invalid unit price")?,
            total_price: parse_funds(&total_price_str).context("Invalid total price")?,
            status: TransferStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transfer status: {}", status_str))?,
            stock_ids: serde_json::from_str(&stock_ids_json).context("Invalid stock id list")?,
            failure: row.get("failure"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
        })
    }

    // ========================
    // Integrity
    // ========================

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let user_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM users")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let stock_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM stocks")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.issued_shares, COUNT(s.id) as owned
            FROM companies c
            LEFT JOIN stocks s ON s.company_id = c.id
            GROUP BY c.id, c.name, c.issued_shares
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count shares per company")?;

        let share_counts = rows
            .iter()
            .map(|row| ShareCount {
                company_id: row.get("id"),
                company_name: row.get("name"),
                issued: row.get("issued_shares"),
                owned: row.get("owned"),
            })
            .collect();

        let orphaned_stocks: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM stocks s
            WHERE NOT EXISTS (SELECT 1 FROM users u WHERE u.id = s.owner_id)
               OR NOT EXISTS (SELECT 1 FROM companies c WHERE c.id = s.company_id)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let unfinished_transfers: i64 =
            sqlx::query("SELECT COUNT(*) as count FROM stock_transfers WHERE status = ?")
                .bind(TransferStatus::Funded.as_str())
                .fetch_one(&self.pool)
                .await?
                .get("count");

        let unpaid_transfers: i64 =
            sqlx::query("SELECT COUNT(*) as count FROM stock_transfers WHERE status = ?")
                .bind(TransferStatus::Pending.as_str())
                .fetch_one(&self.pool)
                .await?
                .get("count");

        Ok(IntegrityStats {
            user_count,
            stock_count,
            share_counts,
            orphaned_stocks,
            unfinished_transfers,
            unpaid_transfers,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}
