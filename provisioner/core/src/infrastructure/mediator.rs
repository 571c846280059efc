// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mock Backend Mediator
//!
//! In-memory stand-in for the array's file-services API, used for
//! development and unit testing. Records created FPGs/VFSes/shares in
//! shared maps and supports one-shot failure injection so every
//! compensation path can be exercised.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::mediator::{BackendMediator, FpgInfo, IpInfo, MediatorError, VfsInfo};
use crate::domain::share::{Share, VfsIp};

pub struct MockMediator {
    pub fpgs: Mutex<HashMap<String, FpgInfo>>,
    /// VFS records keyed by owning FPG (one VFS per FPG)
    pub vfses: Mutex<HashMap<String, VfsInfo>>,
    /// Backend-side shares: name -> backend-assigned id
    pub shares: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
    fail_create_share: AtomicBool,
    fail_create_fpg: AtomicBool,
    fail_create_vfs: AtomicBool,
    fail_delete_share: AtomicBool,
}

impl MockMediator {
    pub fn new() -> Self {
        Self {
            fpgs: Mutex::new(HashMap::new()),
            vfses: Mutex::new(HashMap::new()),
            shares: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_create_share: AtomicBool::new(false),
            fail_create_fpg: AtomicBool::new(false),
            fail_create_vfs: AtomicBool::new(false),
            fail_delete_share: AtomicBool::new(false),
        }
    }

    /// Make the next `create_share` call fail
    pub fn fail_next_create_share(&self) {
        self.fail_create_share.store(true, Ordering::SeqCst);
    }

    /// Make the next `create_fpg` call fail
    pub fn fail_next_create_fpg(&self) {
        self.fail_create_fpg.store(true, Ordering::SeqCst);
    }

    /// Make the next `create_vfs` call fail
    pub fn fail_next_create_vfs(&self) {
        self.fail_create_vfs.store(true, Ordering::SeqCst);
    }

    /// Make the next `delete_share` call fail
    pub fn fail_next_delete_share(&self) {
        self.fail_delete_share.store(true, Ordering::SeqCst);
    }

    /// Seed a backend-side FPG/VFS pair that has no metadata record,
    /// mimicking a container provisioned outside this system
    pub fn seed_legacy_fpg(&self, fpg: FpgInfo, vfs: VfsInfo) {
        self.vfses
            .lock()
            .expect("vfs map poisoned")
            .insert(fpg.name.clone(), vfs);
        self.fpgs
            .lock()
            .expect("fpg map poisoned")
            .insert(fpg.name.clone(), fpg);
    }

    pub fn has_fpg(&self, fpg: &str) -> bool {
        self.fpgs.lock().expect("fpg map poisoned").contains_key(fpg)
    }

    pub fn has_vfs(&self, fpg: &str) -> bool {
        self.vfses.lock().expect("vfs map poisoned").contains_key(fpg)
    }

    pub fn has_share(&self, name: &str) -> bool {
        self.shares
            .lock()
            .expect("share map poisoned")
            .contains_key(name)
    }

    pub fn share_count(&self) -> usize {
        self.shares.lock().expect("share map poisoned").len()
    }

    fn take_flag(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

impl Default for MockMediator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendMediator for MockMediator {
    async fn create_share(&self, share: &Share) -> Result<String, MediatorError> {
        if Self::take_flag(&self.fail_create_share) {
            return Err(MediatorError::Backend(
                "injected share creation failure".to_string(),
            ));
        }
        let id = format!("share-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.shares
            .lock()
            .expect("share map poisoned")
            .insert(share.name.clone(), id.clone());
        Ok(id)
    }

    async fn delete_share(&self, share: &Share) -> Result<(), MediatorError> {
        if Self::take_flag(&self.fail_delete_share) {
            return Err(MediatorError::Backend(
                "injected share deletion failure".to_string(),
            ));
        }
        self.shares
            .lock()
            .expect("share map poisoned")
            .remove(&share.name)
            .map(|_| ())
            .ok_or_else(|| MediatorError::NotFound(share.name.clone()))
    }

    async fn create_fpg(&self, cpg: &str, fpg: &str, size_gib: u64) -> Result<(), MediatorError> {
        if Self::take_flag(&self.fail_create_fpg) {
            return Err(MediatorError::Backend(
                "injected FPG creation failure".to_string(),
            ));
        }
        let mut fpgs = self.fpgs.lock().expect("fpg map poisoned");
        if fpgs.contains_key(fpg) {
            return Err(MediatorError::AlreadyExists(fpg.to_string()));
        }
        fpgs.insert(
            fpg.to_string(),
            FpgInfo {
                name: fpg.to_string(),
                cpg: cpg.to_string(),
                capacity_gib: size_gib,
            },
        );
        Ok(())
    }

    async fn delete_fpg(&self, fpg: &str) -> Result<(), MediatorError> {
        self.fpgs
            .lock()
            .expect("fpg map poisoned")
            .remove(fpg)
            .map(|_| ())
            .ok_or_else(|| MediatorError::NotFound(fpg.to_string()))
    }

    async fn create_vfs(
        &self,
        _cpg: &str,
        fpg: &str,
        vfs: &str,
        vfs_ip: &VfsIp,
    ) -> Result<(), MediatorError> {
        if Self::take_flag(&self.fail_create_vfs) {
            return Err(MediatorError::Backend(
                "injected VFS creation failure".to_string(),
            ));
        }
        let mut vfses = self.vfses.lock().expect("vfs map poisoned");
        if vfses.contains_key(fpg) {
            return Err(MediatorError::AlreadyExists(vfs.to_string()));
        }
        vfses.insert(
            fpg.to_string(),
            VfsInfo {
                name: vfs.to_string(),
                ip_info: vec![IpInfo {
                    ip_addr: vfs_ip.address,
                    netmask: vfs_ip.netmask,
                }],
            },
        );
        Ok(())
    }

    async fn delete_vfs(&self, fpg: &str, _vfs: &str) -> Result<(), MediatorError> {
        self.vfses
            .lock()
            .expect("vfs map poisoned")
            .remove(fpg)
            .map(|_| ())
            .ok_or_else(|| MediatorError::NotFound(fpg.to_string()))
    }

    async fn get_fpg(&self, fpg: &str) -> Result<FpgInfo, MediatorError> {
        self.fpgs
            .lock()
            .expect("fpg map poisoned")
            .get(fpg)
            .cloned()
            .ok_or_else(|| MediatorError::NotFound(fpg.to_string()))
    }

    async fn get_vfs(&self, fpg: &str) -> Result<VfsInfo, MediatorError> {
        self.vfses
            .lock()
            .expect("vfs map poisoned")
            .get(fpg)
            .cloned()
            .ok_or_else(|| MediatorError::NotFound(fpg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_ip() -> VfsIp {
        VfsIp::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0))
    }

    #[tokio::test]
    async fn test_share_lifecycle() {
        let mediator = MockMediator::new();
        let share = Share::new("share1", "backend1", "cpg1", 10).unwrap();

        let id = mediator.create_share(&share).await.unwrap();
        assert!(id.starts_with("share-"));
        assert!(mediator.has_share("share1"));

        mediator.delete_share(&share).await.unwrap();
        assert!(!mediator.has_share("share1"));
        assert!(mediator.delete_share(&share).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let mediator = MockMediator::new();
        let share = Share::new("share1", "backend1", "cpg1", 10).unwrap();

        mediator.fail_next_create_share();
        assert!(mediator.create_share(&share).await.is_err());
        assert!(mediator.create_share(&share).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_fpg_is_rejected() {
        let mediator = MockMediator::new();
        mediator.create_fpg("cpg1", "fpg1", 1024).await.unwrap();
        assert!(matches!(
            mediator.create_fpg("cpg1", "fpg1", 1024).await,
            Err(MediatorError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_vfs_round_trip_reports_single_address() {
        let mediator = MockMediator::new();
        mediator
            .create_vfs("cpg1", "fpg1", "vfs1", &test_ip())
            .await
            .unwrap();

        let vfs = mediator.get_vfs("fpg1").await.unwrap();
        assert_eq!(vfs.name, "vfs1");
        let ip = vfs.single_export_address().unwrap();
        assert_eq!(ip.address, Ipv4Addr::new(10, 0, 0, 5));
    }
}
