mod repository;

pub use repository::*;

/// SQL migration for users
pub const MIGRATION_001_USERS: &str = include_str!("migrations/001_users.sql");

/// SQL migration for companies and share units
pub const MIGRATION_002_COMPANIES_STOCKS: &str =
    include_str!("migrations/002_companies_stocks.sql");

/// SQL migration for the share transfer journal
pub const MIGRATION_003_STOCK_TRANSFERS: &str = include_str!("migrations/003_stock_transfers.sql");

/// SQL migration for applied payments, keyed by transfer and kind
pub const MIGRATION_004_PAYMENTS: &str = include_str!("migrations/004_payments.sql");

/// Reverse migrations, applied newest first. Each drops exactly the tables its
/// forward migration created.
pub const MIGRATIONS_DOWN: [&str; 4] = [
    include_str!("migrations/004_payments_down.sql"),
    include_str!("migrations/003_stock_transfers_down.sql"),
    include_str!("migrations/002_companies_stocks_down.sql"),
    include_str!("migrations/001_users_down.sql"),
];
