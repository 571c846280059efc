// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! IP Claim Coordinator
//!
//! Reserves one free address from a backend's configured pool with a
//! two-phase commit: `claim` moves the address from free to locked,
//! `mark_in_use` graduates it to in-use once the VFS consuming it is
//! confirmed. The intermediate locked state stops a concurrent saga from
//! taking the same address while this one is still deciding whether to keep
//! it, without blocking unrelated addresses.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::error::ProvisionError;
use crate::domain::config::BackendConfig;
use crate::domain::repository::IpPoolRepository;
use crate::domain::share::VfsIp;

pub struct IpClaimCoordinator {
    backend: String,
    pool: Arc<dyn IpPoolRepository>,
    claimed: Option<VfsIp>,
}

impl IpClaimCoordinator {
    pub fn new(backend: impl Into<String>, pool: Arc<dyn IpPoolRepository>) -> Self {
        Self {
            backend: backend.into(),
            pool,
            claimed: None,
        }
    }

    /// Reserve one free address from the configured subnets.
    ///
    /// Walks the declared addresses and takes the first one whose
    /// free-to-locked transition succeeds; the per-address test-and-set in
    /// the pool repository is what makes two concurrent claimants safe.
    pub async fn claim(&mut self, config: &BackendConfig) -> Result<VfsIp, ProvisionError> {
        for subnet in &config.subnets {
            for address in &subnet.addresses {
                let candidate = VfsIp::new(*address, subnet.netmask);
                if self.pool.try_lock_ip(&self.backend, &candidate).await? {
                    debug!("Claimed IP {} on backend {}", candidate, self.backend);
                    self.claimed = Some(candidate.clone());
                    return Ok(candidate);
                }
            }
        }
        Err(ProvisionError::IpPoolExhausted {
            backend: self.backend.clone(),
        })
    }

    /// Graduate the claimed address from locked to in-use. Called once the
    /// VFS consuming the address is confirmed on the backend; idempotent.
    pub async fn mark_in_use(&self) -> Result<(), ProvisionError> {
        match &self.claimed {
            Some(ip) => {
                self.pool.mark_in_use(&self.backend, ip.address).await?;
                debug!("IP {} on backend {} is now in use", ip, self.backend);
                Ok(())
            }
            None => {
                warn!(
                    "mark_in_use called with no claimed address on backend {}",
                    self.backend
                );
                Ok(())
            }
        }
    }

    /// Return the claimed address to the free pool. Compensation entry
    /// point; idempotent, and a no-op when nothing was claimed.
    pub async fn release(&mut self) -> Result<(), ProvisionError> {
        if let Some(ip) = self.claimed.take() {
            self.pool.release(&self.backend, ip.address).await?;
            debug!("Released IP {} on backend {}", ip, self.backend);
        }
        Ok(())
    }

    /// The address this coordinator currently holds, if any
    pub fn claimed(&self) -> Option<&VfsIp> {
        self.claimed.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::SubnetConfig;
    use crate::infrastructure::metadata::{InMemoryMetadataStore, IpState};
    use std::net::Ipv4Addr;

    fn pool_config(addresses: Vec<Ipv4Addr>) -> BackendConfig {
        BackendConfig {
            subnets: vec![SubnetConfig {
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                addresses,
            }],
        }
    }

    #[tokio::test]
    async fn test_claim_locks_one_address() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let config = pool_config(vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)]);

        let mut coordinator = IpClaimCoordinator::new("backend1", store.clone());
        let ip = coordinator.claim(&config).await.unwrap();

        assert_eq!(ip.address, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(store.ip_state("backend1", ip.address), IpState::Locked);
        assert_eq!(
            store.ip_state("backend1", Ipv4Addr::new(10, 0, 0, 6)),
            IpState::Free
        );
    }

    #[tokio::test]
    async fn test_concurrent_claimants_never_share_an_address() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let config = pool_config(vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)]);

        let mut first = IpClaimCoordinator::new("backend1", store.clone());
        let mut second = IpClaimCoordinator::new("backend1", store.clone());

        let a = first.claim(&config).await.unwrap();
        let b = second.claim(&config).await.unwrap();
        assert_ne!(a.address, b.address);

        let mut third = IpClaimCoordinator::new("backend1", store.clone());
        assert!(matches!(
            third.claim(&config).await,
            Err(ProvisionError::IpPoolExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_mark_in_use_then_release_returns_to_free() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let config = pool_config(vec![Ipv4Addr::new(10, 0, 0, 5)]);

        let mut coordinator = IpClaimCoordinator::new("backend1", store.clone());
        let ip = coordinator.claim(&config).await.unwrap();

        coordinator.mark_in_use().await.unwrap();
        assert_eq!(store.ip_state("backend1", ip.address), IpState::InUse);

        // mark_in_use is idempotent
        coordinator.mark_in_use().await.unwrap();
        assert_eq!(store.ip_state("backend1", ip.address), IpState::InUse);

        // release works from the in-use state too
        coordinator.release().await.unwrap();
        assert_eq!(store.ip_state("backend1", ip.address), IpState::Free);
    }

    #[tokio::test]
    async fn test_release_twice_is_a_no_op() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let config = pool_config(vec![Ipv4Addr::new(10, 0, 0, 5)]);

        let mut coordinator = IpClaimCoordinator::new("backend1", store.clone());
        let ip = coordinator.claim(&config).await.unwrap();

        coordinator.release().await.unwrap();
        coordinator.release().await.unwrap();
        assert_eq!(store.ip_state("backend1", ip.address), IpState::Free);
        assert!(coordinator.claimed().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_pool_raises_without_side_effects() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let config = pool_config(vec![Ipv4Addr::new(10, 0, 0, 5)]);

        let mut first = IpClaimCoordinator::new("backend1", store.clone());
        first.claim(&config).await.unwrap();

        let mut second = IpClaimCoordinator::new("backend1", store.clone());
        assert!(matches!(
            second.claim(&config).await,
            Err(ProvisionError::IpPoolExhausted { .. })
        ));
        assert!(second.claimed().is_none());
    }
}
