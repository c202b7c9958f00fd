use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::{ExchangeService, FixedPrice};
use crate::domain::{
    format_funds, parse_funds, NewUser, OwnershipGroup, TransferRequest, TransferStatus,
};

/// Sharebook - stock trading simulation ledger
#[derive(Parser)]
#[command(name = "sharebook")]
#[command(about = "Share ownership ledger and stock transfers for a trading simulation")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "SHAREBOOK_DATABASE", default_value = "sharebook.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Company management commands
    #[command(subcommand)]
    Company(CompanyCommands),

    /// Share unit queries
    #[command(subcommand)]
    Stocks(StocksCommands),

    /// Sell share units from one user to another
    Transfer {
        /// Number of share units to sell
        quantity: i64,

        /// Company whose shares are sold
        #[arg(long)]
        company: i64,

        /// Seller user id
        #[arg(long)]
        from: i64,

        /// Buyer user id
        #[arg(long)]
        to: i64,

        /// Unit price override (defaults to the company's quoted price)
        #[arg(long)]
        price: Option<String>,
    },

    /// List journaled transfers
    Transfers {
        /// Filter by status: pending, funded, completed, failed, compensated
        #[arg(long)]
        status: Option<String>,
    },

    /// Show detailed transfer information
    #[command(name = "show")]
    ShowTransfer {
        /// Transfer ID
        id: String,
    },

    /// Finish transfers that were interrupted before completing
    Recover,

    /// Verify share conservation and journal health
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: holdings, stocks, transfers, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a new user
    Create {
        /// Display name
        name: String,

        /// Email address (must be unique)
        #[arg(long)]
        email: String,

        /// Password (stored as given)
        #[arg(long)]
        password: String,

        /// Grant root privileges
        #[arg(long)]
        root: bool,

        /// Risk level
        #[arg(long, default_value = "0")]
        risk: i64,

        /// Initial funds (e.g., "1000" or "250.50")
        #[arg(long)]
        funds: Option<String>,
    },

    /// List all users
    List,

    /// Show user details and holdings
    Show {
        /// User id
        id: i64,
    },

    /// Add funds to a user
    Deposit {
        /// User id
        id: i64,

        /// Amount (e.g., "100" or "12.50")
        amount: String,
    },
}

#[derive(Subcommand)]
pub enum CompanyCommands {
    /// List a new company
    Create {
        /// Company name (must be unique)
        name: String,

        /// Quoted stock price (defaults to the daily open)
        #[arg(long)]
        price: Option<String>,
    },

    /// List all companies
    List,

    /// Show company details and shareholders
    Show {
        /// Company id
        id: i64,
    },

    /// Quote a new stock price
    Price {
        /// Company id
        id: i64,

        /// New unit price
        price: String,
    },

    /// Issue new share units to a user
    Issue {
        /// Company id
        id: i64,

        /// Receiving user id
        #[arg(long)]
        owner: i64,

        /// Number of share units
        #[arg(long)]
        count: i64,
    },
}

#[derive(Subcommand)]
pub enum StocksCommands {
    /// List every share unit
    List,

    /// Find share units by attribute (id, ownerId, companyId)
    Find {
        /// Attribute name
        key: String,

        /// Attribute value
        value: i64,
    },

    /// Holdings grouped by owner
    ByOwner {
        /// Only this owner
        #[arg(long)]
        owner: Option<i64>,
    },

    /// Holdings grouped by company
    ByCompany {
        /// Only this company
        #[arg(long)]
        company: Option<i64>,
    },

    /// Total share units held by an owner or issued by a company
    Total {
        /// Owner id
        #[arg(long, conflicts_with = "company", required_unless_present = "company")]
        owner: Option<i64>,

        /// Company id
        #[arg(long)]
        company: Option<i64>,
    },
}

impl Cli {
    async fn auto_recover(&self, service: &ExchangeService) -> Result<()> {
        let results = service.recover_transfers().await?;

        for result in results {
            match result.outcome {
                Ok(transfer) => info!(transfer_id = %transfer.id, "Recovered transfer"),
                Err(e) => warn!(transfer_id = %result.transfer_id, error = %e, "Recovery failed"),
            }
        }
        Ok(())
    }

    pub async fn run(self) -> Result<()> {
        // Finish interrupted transfers before command dispatch (except for Init)
        if !matches!(self.command, Commands::Init | Commands::Recover) {
            if let Ok(service) = ExchangeService::connect(&self.database).await {
                if let Err(e) = self.auto_recover(&service).await {
                    warn!(error = %e, "Automatic recovery failed");
                }
            }
        }

        match self.command {
            Commands::Init => {
                ExchangeService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::User(user_cmd) => {
                let service = ExchangeService::connect(&self.database).await?;
                run_user_command(&service, user_cmd).await?;
            }

            Commands::Company(company_cmd) => {
                let service = ExchangeService::connect(&self.database).await?;
                run_company_command(&service, company_cmd).await?;
            }

            Commands::Stocks(stocks_cmd) => {
                let service = ExchangeService::connect(&self.database).await?;
                run_stocks_command(&service, stocks_cmd).await?;
            }

            Commands::Transfer {
                quantity,
                company,
                from,
                to,
                price,
            } => {
                let service = ExchangeService::connect(&self.database).await?;
                let request = TransferRequest::new(from, to, company, quantity);

                let transfer = match price {
                    Some(price) => {
                        let unit_price = parse_funds(&price)
                            .context("Invalid price format. Use '10.00' or '10'")?;
                        service
                            .transfer_ownership_with(request, &FixedPrice(unit_price))
                            .await?
                    }
                    None => service.transfer_ownership(request).await?,
                };

                println!(
                    "Stocks successfully transferred: {} x company {} from user {} to user {} for {} ({})",
                    transfer.quantity,
                    transfer.company_id,
                    transfer.seller_id,
                    transfer.buyer_id,
                    format_funds(transfer.total_price),
                    transfer.id
                );
            }

            Commands::Transfers { status } => {
                let service = ExchangeService::connect(&self.database).await?;
                let status = status
                    .map(|s| {
                        TransferStatus::from_str(&s)
                            .ok_or_else(|| anyhow::anyhow!("Invalid status '{}'", s))
                    })
                    .transpose()?;
                run_transfers_command(&service, status).await?;
            }

            Commands::ShowTransfer { id } => {
                let service = ExchangeService::connect(&self.database).await?;
                let transfer_id =
                    Uuid::parse_str(&id).context("Invalid transfer ID format (expected UUID)")?;
                run_show_transfer_command(&service, transfer_id).await?;
            }

            Commands::Recover => {
                let service = ExchangeService::connect(&self.database).await?;
                let results = service.recover_transfers().await?;
                if results.is_empty() {
                    println!("No interrupted transfers.");
                }
                for result in results {
                    match result.outcome {
                        Ok(transfer) => println!("Completed: {}", transfer.id),
                        Err(e) => println!("Failed:    {} ({})", result.transfer_id, e),
                    }
                }
            }

            Commands::Check => {
                let service = ExchangeService::connect(&self.database).await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                export_type,
                output,
            } => {
                let service = ExchangeService::connect(&self.database).await?;
                run_export_command(&service, &export_type, output.as_deref()).await?;
            }
        }

        Ok(())
    }
}

async fn run_user_command(service: &ExchangeService, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Create {
            name,
            email,
            password,
            root,
            risk,
            funds,
        } => {
            let mut new_user = NewUser::new(name, email, password)
                .with_root(root)
                .with_risk(risk);
            if let Some(funds) = funds {
                new_user = new_user
                    .with_funds(parse_funds(&funds).context("Invalid funds format")?);
            }

            let user = service.register_user(new_user).await?;
            println!("Created user: {} <{}> (id {})", user.name, user.email, user.id);
        }

        UserCommands::List => {
            let users = service.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:>6} {:<20} {:<28} {:>14}", "ID", "NAME", "EMAIL", "FUNDS");
                println!("{}", "-".repeat(71));
                for user in users {
                    println!(
                        "{:>6} {:<20} {:<28} {:>14}",
                        user.id,
                        truncate(&user.name, 20),
                        truncate(&user.email, 28),
                        format_funds(user.funds)
                    );
                }
            }
        }

        UserCommands::Show { id } => {
            let user = service.get_user(id).await?;
            let holdings = service.ledger().get_stocks_from_owner(id).await?;

            println!("User: {}", user.name);
            println!("  ID:       {}", user.id);
            println!("  Email:    {}", user.email);
            println!("  Root:     {}", if user.is_root { "yes" } else { "no" });
            println!("  Risk:     {}", user.risk);
            println!("  Funds:    {}", format_funds(user.funds));
            println!();
            print_groups(&holdings);
        }

        UserCommands::Deposit { id, amount } => {
            let amount = parse_funds(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let balance = service.deposit(id, amount).await?;
            println!(
                "Deposited {} to user {} (balance {})",
                format_funds(amount),
                id,
                format_funds(balance)
            );
        }
    }
    Ok(())
}

async fn run_company_command(service: &ExchangeService, cmd: CompanyCommands) -> Result<()> {
    match cmd {
        CompanyCommands::Create { name, price } => {
            let price = price
                .map(|p| parse_funds(&p))
                .transpose()
                .context("Invalid price format")?;
            let company = service.create_company(name, price).await?;
            println!(
                "Listed company: {} at {} (id {})",
                company.name,
                format_funds(company.stock_price),
                company.id
            );
        }

        CompanyCommands::List => {
            let companies = service.list_companies().await?;
            if companies.is_empty() {
                println!("No companies found.");
            } else {
                println!("{:>6} {:<24} {:>12} {:>10}", "ID", "NAME", "PRICE", "ISSUED");
                println!("{}", "-".repeat(55));
                for company in companies {
                    println!(
                        "{:>6} {:<24} {:>12} {:>10}",
                        company.id,
                        truncate(&company.name, 24),
                        format_funds(company.stock_price),
                        company.issued_shares
                    );
                }
            }
        }

        CompanyCommands::Show { id } => {
            let company = service.get_company(id).await?;
            let holders = service.ledger().get_stocks_from_company(id).await?;

            println!("Company: {}", company.name);
            println!("  ID:       {}", company.id);
            println!("  Price:    {}", format_funds(company.stock_price));
            println!("  Issued:   {}", company.issued_shares);
            println!();
            print_groups(&holders);
        }

        CompanyCommands::Price { id, price } => {
            let price = parse_funds(&price).context("Invalid price format")?;
            let company = service.set_stock_price(id, price).await?;
            println!(
                "{} now quoted at {}",
                company.name,
                format_funds(company.stock_price)
            );
        }

        CompanyCommands::Issue { id, owner, count } => {
            let ids = service.issue_shares(id, owner, count).await?;
            println!(
                "Issued {} share unit(s) of company {} to user {}",
                ids.len(),
                id,
                owner
            );
        }
    }
    Ok(())
}

async fn run_stocks_command(service: &ExchangeService, cmd: StocksCommands) -> Result<()> {
    let ledger = service.ledger();

    match cmd {
        StocksCommands::List => {
            let stocks = ledger.get_stocks().await?;
            if stocks.is_empty() {
                println!("No stocks found.");
            } else {
                println!("{:>8} {:>8} {:>8}", "ID", "OWNER", "COMPANY");
                println!("{}", "-".repeat(26));
                for stock in stocks {
                    println!("{:>8} {:>8} {:>8}", stock.id, stock.owner_id, stock.company_id);
                }
            }
        }

        StocksCommands::Find { key, value } => {
            let stocks = ledger.get_stocks_by_attribute(&key, value).await?;
            println!("{:>8} {:>8} {:>8}", "ID", "OWNER", "COMPANY");
            println!("{}", "-".repeat(26));
            for stock in stocks {
                println!("{:>8} {:>8} {:>8}", stock.id, stock.owner_id, stock.company_id);
            }
        }

        StocksCommands::ByOwner { owner } => {
            let groups = match owner {
                Some(id) => ledger.get_stocks_from_owner(id).await?,
                None => ledger.get_stocks_by_owner().await?,
            };
            print_groups(&groups);
        }

        StocksCommands::ByCompany { company } => {
            let groups = match company {
                Some(id) => ledger.get_stocks_from_company(id).await?,
                None => ledger.get_stocks_by_company().await?,
            };
            print_groups(&groups);
        }

        StocksCommands::Total { owner, company } => match (owner, company) {
            (Some(id), _) => {
                let total = ledger.get_total_stocks_from_owner(id).await?;
                println!("User {} owns {} share unit(s)", id, total);
            }
            (None, Some(id)) => {
                let total = ledger.get_total_stocks_from_company(id).await?;
                println!("Company {} has {} share unit(s) outstanding", id, total);
            }
            (None, None) => anyhow::bail!("Pass --owner or --company"),
        },
    }
    Ok(())
}

fn print_groups(groups: &[OwnershipGroup]) {
    if groups.is_empty() {
        println!("No holdings.");
        return;
    }
    println!("{:>8} {:>8} {:>8}", "OWNER", "COMPANY", "OWNED");
    println!("{}", "-".repeat(26));
    for group in groups {
        println!(
            "{:>8} {:>8} {:>8}",
            group.owner_id, group.company_id, group.owned
        );
    }
}

async fn run_transfers_command(
    service: &ExchangeService,
    status: Option<TransferStatus>,
) -> Result<()> {
    let transfers = service.list_transfers(status).await?;

    if transfers.is_empty() {
        println!("No transfers found.");
        return Ok(());
    }

    println!(
        "{:<20} {:>7} {:>7} {:>7} {:>5} {:>12} {:<11} ID",
        "DATE", "SELLER", "BUYER", "COMPANY", "QTY", "TOTAL", "STATUS"
    );
    println!("{}", "-".repeat(110));
    for transfer in transfers {
        println!(
            "{:<20} {:>7} {:>7} {:>7} {:>5} {:>12} {:<11} {}",
            transfer.created_at.format("%Y-%m-%d %H:%M:%S"),
            transfer.seller_id,
            transfer.buyer_id,
            transfer.company_id,
            transfer.quantity,
            format_funds(transfer.total_price),
            transfer.status,
            transfer.id
        );
    }
    Ok(())
}

async fn run_show_transfer_command(service: &ExchangeService, id: Uuid) -> Result<()> {
    let transfer = service.get_transfer(id).await?;

    println!("Transfer: {}", transfer.id);
    println!("  Status:      {}", transfer.status);
    println!("  Seller:      {}", transfer.seller_id);
    println!("  Buyer:       {}", transfer.buyer_id);
    println!("  Company:     {}", transfer.company_id);
    println!("  Quantity:    {}", transfer.quantity);
    println!("  Unit price:  {}", format_funds(transfer.unit_price));
    println!("  Total:       {}", format_funds(transfer.total_price));
    if transfer.has_selection() {
        let ids: Vec<String> = transfer.stock_ids.iter().map(|id| id.to_string()).collect();
        println!("  Share units: {}", ids.join(", "));
    }
    if let Some(failure) = &transfer.failure {
        println!("  Failure:     {}", failure);
    }
    println!(
        "  Created:     {}",
        transfer.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated:     {}",
        transfer.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

async fn run_check_command(service: &ExchangeService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Users:       {}", report.user_count);
    println!("Companies:   {}", report.company_count);
    println!("Share units: {}", report.stock_count);
    println!();

    println!("Shares by company:");
    for count in &report.share_counts {
        println!(
            "  {:<20} issued {:>8}  owned {:>8}  {}",
            truncate(&count.company_name, 20),
            count.issued,
            count.owned,
            if count.is_conserved() { "OK" } else { "MISMATCH!" }
        );
    }
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }
    Ok(())
}

async fn run_export_command(
    service: &ExchangeService,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "holdings" => {
            let count = exporter.export_holdings_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} holdings", count);
            }
        }
        "stocks" => {
            let count = exporter.export_stocks_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} share units", count);
            }
        }
        "transfers" => {
            let count = exporter.export_transfers_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transfers", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} users, {} companies, {} share units, {} transfers",
                    snapshot.users.len(),
                    snapshot.companies.len(),
                    snapshot.stocks.len(),
                    snapshot.transfers.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: holdings, stocks, transfers, full",
                export_type
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
