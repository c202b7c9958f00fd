use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::CompanyId;

/// One async lock per company. Transfers of the same company run one at a
/// time; transfers of different companies proceed concurrently.
#[derive(Default)]
pub struct CompanyLocks {
    locks: Mutex<HashMap<CompanyId, Arc<AsyncMutex<()>>>>,
}

impl CompanyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the company's share units.
    pub async fn lock(&self, company_id: CompanyId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(company_id).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_company_is_exclusive() {
        let locks = CompanyLocks::new();
        let _held = locks.lock(1).await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(second.is_err(), "second lock on the same company must wait");
    }

    #[tokio::test]
    async fn test_different_companies_do_not_block() {
        let locks = CompanyLocks::new();
        let _held = locks.lock(1).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock(2)).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_lock_is_released_on_drop() {
        let locks = CompanyLocks::new();
        drop(locks.lock(1).await);

        let again = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(again.is_ok());
    }
}
