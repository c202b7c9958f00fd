use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Funds;

pub type UserId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Stored as given; hashing happens before it reaches this layer.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub is_root: bool,
    pub risk: i64,
    pub funds: Funds,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A user about to be registered. The id is assigned by the database.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub is_root: bool,
    pub risk: i64,
    pub funds: Funds,
}

impl NewUser {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            is_root: false,
            risk: 0,
            funds: Decimal::ZERO,
        }
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    pub fn with_risk(mut self, risk: i64) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_funds(mut self, funds: Funds) -> Self {
        self.funds = funds;
        self
    }

    /// Returns the first rule the user violates, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.email.trim().is_empty() {
            return Err("email must not be empty".to_string());
        }
        if self.funds.is_sign_negative() {
            return Err("initial funds must not be negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = NewUser::new("Ada", "ada@example.com", "secret");
        assert!(!user.is_root);
        assert_eq!(user.risk, 0);
        assert_eq!(user.funds, Decimal::ZERO);
        assert!(user.validate().is_ok());
    }

    #[test]
    fn test_new_user_rejects_empty_name() {
        let user = NewUser::new("  ", "ada@example.com", "secret");
        assert!(user.validate().is_err());
    }

    #[test]
    fn test_new_user_rejects_negative_funds() {
        let user = NewUser::new("Ada", "ada@example.com", "secret").with_funds(dec!(-1));
        assert!(user.validate().is_err());
    }
}
