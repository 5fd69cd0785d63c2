//! No-op lease for unclustered deployments
//!
//! Always master, never contended. Lets the monitor run with the same
//! wiring whether or not failover is configured.

use async_trait::async_trait;

use crate::Lease;

#[derive(Debug, Default)]
pub struct NullLease;

#[async_trait]
impl Lease for NullLease {
    async fn acquire(&mut self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn is_alive(&mut self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_master() {
        let mut lease = NullLease;
        assert!(lease.acquire().await.unwrap());
        assert!(lease.is_alive().await.unwrap());
        lease.release().await;
        assert!(lease.acquire().await.unwrap());
    }
}
