use std::time::Duration;

use common::TokenMetrics;

const DEPOSIT_ADDRESS_BODY_LEN: usize = 32;

/// Stand-in for the wallet backend. Nothing here touches balances.
#[derive(Debug, Clone)]
pub struct DepositDesk {
    verification_delay: Duration,
}

impl DepositDesk {
    pub fn new(verification_delay: Duration) -> Self {
        Self { verification_delay }
    }

    pub fn metrics(&self) -> TokenMetrics {
        TokenMetrics::reference()
    }

    /// Deterministic per user: `xM` followed by the user id padded with `0`
    /// to 32 characters.
    pub fn deposit_address(&self, user_id: &str) -> String {
        format!("xM{:0<width$}", user_id, width = DEPOSIT_ADDRESS_BODY_LEN)
    }

    /// Resolves once, after the configured delay. Every non-empty hash is
    /// accepted.
    pub async fn verify_deposit(&self, tx_hash: &str) -> bool {
        if tx_hash.trim().is_empty() {
            return false;
        }
        tokio::time::sleep(self.verification_delay).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_padded_user_ids() {
        let desk = DepositDesk::new(Duration::from_secs(2));
        let address = desk.deposit_address("42");
        assert_eq!(address, format!("xM42{}", "0".repeat(30)));
        assert_eq!(address.len(), 34);
        assert_eq!(desk.deposit_address("42"), address);
    }

    #[tokio::test(start_paused = true)]
    async fn verification_waits_for_the_delay() {
        let desk = DepositDesk::new(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        assert!(desk.verify_deposit("0xabc").await);
        assert!(started.elapsed() >= Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        assert!(!desk.verify_deposit("   ").await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn burned_tokens_leave_circulation() {
        let desk = DepositDesk::new(Duration::ZERO);
        assert_eq!(desk.metrics().circulating_supply(), 13_500_000_000);
    }
}
