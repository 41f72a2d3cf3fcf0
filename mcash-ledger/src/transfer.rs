//! Outbound value transfer collaborator.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::transition::Transfer;

/// Moves value to a destination once a payment has committed.
#[async_trait]
pub trait FundsTransfer: Send + Sync {
    /// Send the transfer and return a receipt reference.
    async fn transfer(&self, transfer: &Transfer) -> Result<String>;
}

/// Records transfers in memory instead of moving funds.
#[derive(Debug, Default)]
pub struct TransferLog {
    sent: Mutex<Vec<Transfer>>,
}

impl TransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Transfer> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl FundsTransfer for TransferLog {
    async fn transfer(&self, transfer: &Transfer) -> Result<String> {
        let mut sent = self.sent.lock().await;
        sent.push(*transfer);
        let reference = format!("transfer-{}", sent.len());
        info!(
            destination = %transfer.destination,
            amount = transfer.amount,
            %reference,
            "recorded outbound transfer"
        );
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AccountId;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[tokio::test]
    async fn log_records_in_order() {
        let log = TransferLog::new();
        let destination =
            AccountId::from_verifying_key(SigningKey::generate(&mut OsRng).verifying_key());
        let first = Transfer {
            destination,
            amount: 5,
        };
        let second = Transfer {
            destination,
            amount: 7,
        };
        assert_eq!(log.transfer(&first).await.unwrap(), "transfer-1");
        assert_eq!(log.transfer(&second).await.unwrap(), "transfer-2");
        assert_eq!(log.sent().await, vec![first, second]);
    }
}
