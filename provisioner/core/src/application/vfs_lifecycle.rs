// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! VFS Lifecycle Application Service
//!
//! Thin pass-through to the mediator: binds a virtual file server to an FPG
//! on a claimed address, and tears it down as compensation. No local state
//! is persisted here; the caller attaches the binding to the records it
//! owns.

use std::sync::Arc;
use tracing::info;

use crate::application::error::ProvisionError;
use crate::domain::mediator::{BackendMediator, MediatorError};
use crate::domain::share::VfsIp;

pub struct VfsLifecycleService {
    mediator: Arc<dyn BackendMediator>,
}

impl VfsLifecycleService {
    pub fn new(mediator: Arc<dyn BackendMediator>) -> Self {
        Self { mediator }
    }

    /// Bind a virtual file server to an FPG on the given address
    pub async fn create_vfs(
        &self,
        cpg: &str,
        fpg: &str,
        vfs: &str,
        vfs_ip: &VfsIp,
    ) -> Result<(), ProvisionError> {
        info!("Creating VFS {} on FPG {} at {}", vfs, fpg, vfs_ip);
        self.mediator
            .create_vfs(cpg, fpg, vfs, vfs_ip)
            .await
            .map_err(|e| ProvisionError::VfsCreationFailed {
                vfs: vfs.to_string(),
                reason: e.to_string(),
            })
    }

    /// Delete a virtual file server. Compensation entry point: an
    /// already-absent VFS counts as success so the step can run twice.
    pub async fn delete_vfs(&self, fpg: &str, vfs: &str) -> Result<(), MediatorError> {
        match self.mediator.delete_vfs(fpg, vfs).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mediator::MockMediator;
    use std::net::Ipv4Addr;

    fn test_ip() -> VfsIp {
        VfsIp::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0))
    }

    #[tokio::test]
    async fn test_create_and_delete_vfs() {
        let mediator = Arc::new(MockMediator::new());
        let svc = VfsLifecycleService::new(mediator.clone());

        svc.create_vfs("cpg1", "fpg1", "vfs1", &test_ip()).await.unwrap();
        assert!(mediator.has_vfs("fpg1"));

        svc.delete_vfs("fpg1", "vfs1").await.unwrap();
        assert!(!mediator.has_vfs("fpg1"));
    }

    #[tokio::test]
    async fn test_create_failure_maps_to_vfs_creation_failed() {
        let mediator = Arc::new(MockMediator::new());
        mediator.fail_next_create_vfs();
        let svc = VfsLifecycleService::new(mediator);

        let result = svc.create_vfs("cpg1", "fpg1", "vfs1", &test_ip()).await;
        assert!(matches!(result, Err(ProvisionError::VfsCreationFailed { .. })));
    }

    #[tokio::test]
    async fn test_delete_missing_vfs_is_ok() {
        let mediator = Arc::new(MockMediator::new());
        let svc = VfsLifecycleService::new(mediator);
        svc.delete_vfs("fpg1", "vfs1").await.unwrap();
    }
}
