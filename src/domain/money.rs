use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Funds and prices are exact decimals. They are stored as TEXT and must never
/// go through a floating-point representation.
pub type Funds = Decimal;

/// Daily market band used when quoting newly listed companies.
pub const HIGH: &str = "100";
pub const LOW: &str = "50";
pub const OPEN: &str = "75";
pub const CLOSE: &str = "75";
pub const LOW_HOUR: u32 = 12;
pub const HIGH_HOUR: u32 = 16;

/// Parse a decimal string into an exact amount.
/// Example: "50" -> 50, "12.345" -> 12.345, "  7.5 " -> 7.5
pub fn parse_funds(input: &str) -> Result<Funds, ParseFundsError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseFundsError::Empty);
    }
    Decimal::from_str(input).map_err(|_| ParseFundsError::InvalidFormat(input.to_string()))
}

/// Format an amount for storage and display, without trailing zeros.
/// Example: 30.00 -> "30", 12.50 -> "12.5"
pub fn format_funds(amount: Funds) -> String {
    amount.normalize().to_string()
}

/// Total price of `quantity` share units at `unit_price`.
/// Returns None on overflow.
pub fn total_price(unit_price: Funds, quantity: i64) -> Option<Funds> {
    unit_price.checked_mul(Decimal::from(quantity))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFundsError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount format: {0}")]
    InvalidFormat(String),
}

/// The high/low/open/close band of a trading day, with the hours at which the
/// low and the high are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuote {
    pub high: Funds,
    pub low: Funds,
    pub open: Funds,
    pub close: Funds,
    pub low_hour: u32,
    pub high_hour: u32,
}

impl Default for DailyQuote {
    fn default() -> Self {
        // The band constants above are literal decimals.
        let constant = |s: &str| Decimal::from_str(s).unwrap_or(Decimal::ZERO);
        Self {
            high: constant(HIGH),
            low: constant(LOW),
            open: constant(OPEN),
            close: constant(CLOSE),
            low_hour: LOW_HOUR,
            high_hour: HIGH_HOUR,
        }
    }
}
