// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-Memory Metadata Store
//!
//! Implements every metadata-store contract (share/FPG/backend records, the
//! per-backend IP pool, and the named `(backend, fpg)` locks) on process
//! memory. Used for development and testing; the etcd-backed store ships as
//! a separate crate and honors the same traits.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::domain::fpg::{BackendMetadata, FpgMetadata};
use crate::domain::repository::{
    BackendRepository, FpgLockGuard, FpgRepository, IpPoolRepository, LockError, LockLease,
    LockManager, RepositoryError, ShareRepository,
};
use crate::domain::share::{Share, VfsIp};

/// Which of the three disjoint reservation sets an address sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpState {
    Free,
    Locked,
    InUse,
}

#[derive(Default)]
struct IpPoolState {
    locked: HashSet<Ipv4Addr>,
    in_use: HashSet<Ipv4Addr>,
}

pub struct InMemoryMetadataStore {
    shares: DashMap<String, Share>,
    fpgs: DashMap<String, FpgMetadata>,
    backends: DashMap<String, BackendMetadata>,
    // One critical section per backend pool: the free->locked test-and-set
    // must observe both sets atomically.
    ip_pools: Mutex<HashMap<String, IpPoolState>>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            shares: DashMap::new(),
            fpgs: DashMap::new(),
            backends: DashMap::new(),
            ip_pools: Mutex::new(HashMap::new()),
            locks: DashMap::new(),
        }
    }

    fn fpg_key(backend: &str, cpg: &str, fpg: &str) -> String {
        format!("{}/{}/{}", backend, cpg, fpg)
    }

    // ------------------------------------------------------------------
    // Inherent accessors for diagnostics and tests
    // ------------------------------------------------------------------

    pub fn share(&self, name: &str) -> Option<Share> {
        self.shares.get(name).map(|e| e.value().clone())
    }

    pub fn fpg_metadata(&self, backend: &str, cpg: &str, fpg: &str) -> Option<FpgMetadata> {
        self.fpgs
            .get(&Self::fpg_key(backend, cpg, fpg))
            .map(|e| e.value().clone())
    }

    pub fn backend_metadata(&self, backend: &str) -> Option<BackendMetadata> {
        self.backends.get(backend).map(|e| e.value().clone())
    }

    /// Seed or overwrite an FPG record directly (test setup)
    pub fn put_fpg_metadata(&self, meta: FpgMetadata) {
        self.fpgs
            .insert(Self::fpg_key(&meta.backend, &meta.cpg, &meta.fpg), meta);
    }

    /// Seed or overwrite a backend record directly (test setup)
    pub fn put_backend_metadata(&self, meta: BackendMetadata) {
        self.backends.insert(meta.backend.clone(), meta);
    }

    pub fn ip_state(&self, backend: &str, address: Ipv4Addr) -> IpState {
        let pools = self.ip_pools.lock().expect("ip pool mutex poisoned");
        match pools.get(backend) {
            Some(pool) if pool.in_use.contains(&address) => IpState::InUse,
            Some(pool) if pool.locked.contains(&address) => IpState::Locked,
            _ => IpState::Free,
        }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShareRepository for InMemoryMetadataStore {
    async fn save(&self, share: &Share) -> Result<(), RepositoryError> {
        self.shares.insert(share.name.clone(), share.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Share>, RepositoryError> {
        Ok(self.share(name))
    }

    async fn list_by_backend(&self, backend: &str) -> Result<Vec<Share>, RepositoryError> {
        let mut shares: Vec<Share> = self
            .shares
            .iter()
            .filter(|e| e.value().backend == backend)
            .map(|e| e.value().clone())
            .collect();
        shares.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(shares)
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        self.shares.remove(name);
        Ok(())
    }
}

#[async_trait]
impl FpgRepository for InMemoryMetadataStore {
    async fn save(&self, meta: &FpgMetadata) -> Result<(), RepositoryError> {
        self.fpgs.insert(
            Self::fpg_key(&meta.backend, &meta.cpg, &meta.fpg),
            meta.clone(),
        );
        Ok(())
    }

    async fn find(
        &self,
        backend: &str,
        cpg: &str,
        fpg: &str,
    ) -> Result<Option<FpgMetadata>, RepositoryError> {
        Ok(self.fpg_metadata(backend, cpg, fpg))
    }

    async fn list_by_cpg(
        &self,
        backend: &str,
        cpg: &str,
    ) -> Result<Vec<FpgMetadata>, RepositoryError> {
        let mut records: Vec<FpgMetadata> = self
            .fpgs
            .iter()
            .filter(|e| e.value().backend == backend && e.value().cpg == cpg)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| a.fpg.cmp(&b.fpg));
        Ok(records)
    }

    async fn delete(&self, backend: &str, cpg: &str, fpg: &str) -> Result<(), RepositoryError> {
        self.fpgs.remove(&Self::fpg_key(backend, cpg, fpg));
        Ok(())
    }
}

#[async_trait]
impl BackendRepository for InMemoryMetadataStore {
    async fn save(&self, meta: &BackendMetadata) -> Result<(), RepositoryError> {
        self.backends.insert(meta.backend.clone(), meta.clone());
        Ok(())
    }

    async fn find(&self, backend: &str) -> Result<Option<BackendMetadata>, RepositoryError> {
        Ok(self.backend_metadata(backend))
    }
}

#[async_trait]
impl IpPoolRepository for InMemoryMetadataStore {
    async fn try_lock_ip(&self, backend: &str, ip: &VfsIp) -> Result<bool, RepositoryError> {
        let mut pools = self
            .ip_pools
            .lock()
            .map_err(|_| RepositoryError::Store("ip pool mutex poisoned".to_string()))?;
        let pool = pools.entry(backend.to_string()).or_default();
        if pool.locked.contains(&ip.address) || pool.in_use.contains(&ip.address) {
            return Ok(false);
        }
        pool.locked.insert(ip.address);
        Ok(true)
    }

    async fn mark_in_use(&self, backend: &str, address: Ipv4Addr) -> Result<(), RepositoryError> {
        let mut pools = self
            .ip_pools
            .lock()
            .map_err(|_| RepositoryError::Store("ip pool mutex poisoned".to_string()))?;
        let pool = pools.entry(backend.to_string()).or_default();
        pool.locked.remove(&address);
        pool.in_use.insert(address);
        Ok(())
    }

    async fn release(&self, backend: &str, address: Ipv4Addr) -> Result<(), RepositoryError> {
        let mut pools = self
            .ip_pools
            .lock()
            .map_err(|_| RepositoryError::Store("ip pool mutex poisoned".to_string()))?;
        let pool = pools.entry(backend.to_string()).or_default();
        pool.locked.remove(&address);
        pool.in_use.remove(&address);
        Ok(())
    }
}

struct InMemoryLockLease {
    _guard: OwnedMutexGuard<()>,
}

impl LockLease for InMemoryLockLease {}

#[async_trait]
impl LockManager for InMemoryMetadataStore {
    async fn acquire_fpg_lock(
        &self,
        backend: &str,
        fpg: &str,
        timeout: Duration,
    ) -> Result<FpgLockGuard, LockError> {
        let key = format!("{}/{}", backend, fpg);
        let mutex = {
            let entry = self.locks.entry(key).or_default();
            entry.value().clone()
        };
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!("Acquired FPG lock {}/{}", backend, fpg);
                Ok(FpgLockGuard::new(
                    backend,
                    fpg,
                    Box::new(InMemoryLockLease { _guard: guard }),
                ))
            }
            Err(_) => Err(LockError::Timeout {
                backend: backend.to_string(),
                fpg: fpg.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_share_round_trip() {
        let store = InMemoryMetadataStore::new();
        let share = Share::new("share1", "backend1", "cpg1", 10).unwrap();
        ShareRepository::save(&store, &share).await.unwrap();

        let found = store.find_by_name("share1").await.unwrap().unwrap();
        assert_eq!(found.name, "share1");

        ShareRepository::delete(&store, "share1").await.unwrap();
        assert!(store.find_by_name("share1").await.unwrap().is_none());

        // Idempotent delete
        ShareRepository::delete(&store, "share1").await.unwrap();
    }

    #[tokio::test]
    async fn test_fpg_listing_is_sorted_and_scoped() {
        let store = InMemoryMetadataStore::new();
        store.put_fpg_metadata(FpgMetadata::new("backend1", "cpg1", "DockerFpg_b", 1024));
        store.put_fpg_metadata(FpgMetadata::new("backend1", "cpg1", "DockerFpg_a", 1024));
        store.put_fpg_metadata(FpgMetadata::new("backend1", "cpg2", "DockerFpg_c", 1024));
        store.put_fpg_metadata(FpgMetadata::new("backend2", "cpg1", "DockerFpg_d", 1024));

        let records = store.list_by_cpg("backend1", "cpg1").await.unwrap();
        let names: Vec<&str> = records.iter().map(|m| m.fpg.as_str()).collect();
        assert_eq!(names, vec!["DockerFpg_a", "DockerFpg_b"]);
    }

    #[tokio::test]
    async fn test_ip_pool_cas_under_concurrency() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let ip = VfsIp::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0));

        let claims = (0..16).map(|_| {
            let store = store.clone();
            let ip = ip.clone();
            tokio::spawn(async move { store.try_lock_ip("backend1", &ip).await.unwrap() })
        });
        let results = join_all(claims).await;
        let wins = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(wins, 1);
        assert_eq!(store.ip_state("backend1", ip.address), IpState::Locked);
    }

    #[tokio::test]
    async fn test_ip_pools_are_scoped_per_backend() {
        let store = InMemoryMetadataStore::new();
        let ip = VfsIp::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0));

        assert!(store.try_lock_ip("backend1", &ip).await.unwrap());
        // Same address on another backend is an independent pool
        assert!(store.try_lock_ip("backend2", &ip).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_provides_mutual_exclusion() {
        let store = Arc::new(InMemoryMetadataStore::new());

        let guard = store
            .acquire_fpg_lock("backend1", "fpg1", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(guard.fpg(), "fpg1");

        // Second acquisition times out while the first guard is alive
        let contender = store
            .acquire_fpg_lock("backend1", "fpg1", Duration::from_millis(50))
            .await;
        assert!(matches!(contender, Err(LockError::Timeout { .. })));

        // Independent name is not blocked
        let other = store
            .acquire_fpg_lock("backend1", "fpg2", Duration::from_millis(50))
            .await;
        assert!(other.is_ok());

        drop(guard);
        let reacquired = store
            .acquire_fpg_lock("backend1", "fpg1", Duration::from_millis(100))
            .await;
        assert!(reacquired.is_ok());
    }
}
