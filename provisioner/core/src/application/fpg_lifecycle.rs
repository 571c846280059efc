// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! FPG Lifecycle Application Service
//!
//! Creates capacity containers, keeps their share-count bookkeeping, and
//! adopts legacy FPGs that exist on the backend without a metadata record.

use std::sync::Arc;
use tracing::{info, warn};

use crate::application::error::ProvisionError;
use crate::domain::fpg::{BackendMetadata, FpgMetadata};
use crate::domain::mediator::BackendMediator;
use crate::domain::repository::{BackendRepository, FpgRepository};

pub struct FpgLifecycleService {
    mediator: Arc<dyn BackendMediator>,
    fpgs: Arc<dyn FpgRepository>,
    backends: Arc<dyn BackendRepository>,
}

impl FpgLifecycleService {
    pub fn new(
        mediator: Arc<dyn BackendMediator>,
        fpgs: Arc<dyn FpgRepository>,
        backends: Arc<dyn BackendRepository>,
    ) -> Self {
        Self {
            mediator,
            fpgs,
            backends,
        }
    }

    /// Create a capacity container on the backend and persist its metadata.
    ///
    /// Nothing is persisted when the backend call fails. If persisting fails
    /// after the backend call succeeded, the container is torn back down
    /// (best effort) so no unrecorded FPG is left behind.
    pub async fn create_fpg(
        &self,
        backend: &str,
        cpg: &str,
        fpg: &str,
        size_gib: u64,
        make_default: bool,
    ) -> Result<FpgMetadata, ProvisionError> {
        info!(
            "Creating FPG {} on backend {} (cpg: {}, size: {}GiB, default: {})",
            fpg, backend, cpg, size_gib, make_default
        );

        self.mediator
            .create_fpg(cpg, fpg, size_gib)
            .await
            .map_err(|e| ProvisionError::FpgCreationFailed {
                fpg: fpg.to_string(),
                reason: e.to_string(),
            })?;

        let mut meta = FpgMetadata::new(backend, cpg, fpg, size_gib);
        meta.default_for_cpg = make_default;

        if let Err(e) = self.persist_new_fpg(&meta, make_default).await {
            warn!(
                "Failed to persist metadata for FPG {}: {}. Tearing the container down.",
                fpg, e
            );
            if let Err(cleanup) = self.mediator.delete_fpg(fpg).await {
                if !cleanup.is_not_found() {
                    warn!("Failed to delete FPG {} after metadata failure: {}", fpg, cleanup);
                }
            }
            return Err(ProvisionError::FpgCreationFailed {
                fpg: fpg.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(meta)
    }

    async fn persist_new_fpg(
        &self,
        meta: &FpgMetadata,
        make_default: bool,
    ) -> Result<(), ProvisionError> {
        self.fpgs.save(meta).await?;
        if make_default {
            let mut backend_meta = self
                .backends
                .find(&meta.backend)
                .await?
                .unwrap_or_else(|| BackendMetadata::new(&meta.backend));
            backend_meta.set_default_fpg(&meta.cpg, &meta.fpg);
            self.backends.save(&backend_meta).await?;
        }
        Ok(())
    }

    /// Count one more share onto an FPG (read-modify-write).
    ///
    /// Does not lock: it is always invoked from inside a larger critical
    /// section that already holds the `(backend, fpg)` lock, which avoids
    /// re-entrancy and a second round trip to the store.
    pub async fn increment_share_count(
        &self,
        backend: &str,
        cpg: &str,
        fpg: &str,
        max_shares: u32,
    ) -> Result<FpgMetadata, ProvisionError> {
        let mut meta = self.fpgs.find(backend, cpg, fpg).await?.ok_or_else(|| {
            ProvisionError::MetadataNotFound {
                key: format!("{}/{}/{}", backend, cpg, fpg),
            }
        })?;
        let count = meta.register_share(max_shares);
        self.fpgs.save(&meta).await?;
        info!("FPG {} on backend {} now carries {} shares", fpg, backend, count);
        Ok(meta)
    }

    /// Adopt a legacy FPG: read its real attributes and bound VFS from the
    /// backend, synthesize a metadata record with an empty share count, and
    /// persist it so future operations treat it like any other FPG.
    ///
    /// The adopted record is allowed to outlive a failed saga; it merely
    /// reflects true backend state.
    pub async fn adopt_legacy_fpg(
        &self,
        backend: &str,
        fpg: &str,
    ) -> Result<FpgMetadata, ProvisionError> {
        let fpg_info = self.mediator.get_fpg(fpg).await?;
        let vfs_info = self.mediator.get_vfs(fpg).await?;
        let vfs_ip = vfs_info.single_export_address()?;

        // The backend's CPG overrides whatever the caller supplied; a legacy
        // FPG's true CPG may differ.
        let meta = FpgMetadata::adopted(
            backend,
            &fpg_info.cpg,
            fpg,
            fpg_info.capacity_gib,
            &vfs_info.name,
            vfs_ip,
        );
        info!(
            "Adopting legacy FPG {} on backend {} (cpg: {}, vfs: {})",
            fpg, backend, fpg_info.cpg, vfs_info.name
        );
        self.fpgs.save(&meta).await?;
        Ok(meta)
    }

    /// Tear down an FPG created by a saga that later failed: delete the
    /// container, its metadata, and the default pointer it may have set.
    /// An already-absent container counts as success.
    pub async fn dismantle_fpg(
        &self,
        backend: &str,
        cpg: &str,
        fpg: &str,
    ) -> Result<(), ProvisionError> {
        if let Err(e) = self.mediator.delete_fpg(fpg).await {
            if !e.is_not_found() {
                return Err(e.into());
            }
        }
        self.fpgs.delete(backend, cpg, fpg).await?;

        if let Some(mut backend_meta) = self.backends.find(backend).await? {
            if backend_meta.default_fpg_for(cpg) == Some(fpg) {
                backend_meta.clear_default_fpg(cpg, fpg);
                self.backends.save(&backend_meta).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mediator::MockMediator;
    use crate::infrastructure::metadata::InMemoryMetadataStore;
    use std::net::Ipv4Addr;

    use crate::domain::mediator::{FpgInfo, IpInfo, VfsInfo};

    fn service(
        mediator: Arc<MockMediator>,
        store: Arc<InMemoryMetadataStore>,
    ) -> FpgLifecycleService {
        FpgLifecycleService::new(mediator, store.clone(), store)
    }

    #[tokio::test]
    async fn test_create_fpg_persists_empty_metadata() {
        let mediator = Arc::new(MockMediator::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service(mediator.clone(), store.clone());

        let meta = svc
            .create_fpg("backend1", "cpg1", "DockerFpg_1", 1024, false)
            .await
            .unwrap();
        assert_eq!(meta.share_count, 0);
        assert!(!meta.default_for_cpg);

        assert!(store.fpg_metadata("backend1", "cpg1", "DockerFpg_1").is_some());
        assert!(mediator.has_fpg("DockerFpg_1"));
    }

    #[tokio::test]
    async fn test_create_default_fpg_registers_pointer() {
        let mediator = Arc::new(MockMediator::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service(mediator, store.clone());

        svc.create_fpg("backend1", "cpg1", "DockerFpg_1", 1024, true)
            .await
            .unwrap();

        let backend_meta = store.backend_metadata("backend1").unwrap();
        assert_eq!(backend_meta.default_fpg_for("cpg1"), Some("DockerFpg_1"));
    }

    #[tokio::test]
    async fn test_create_fpg_mediator_failure_persists_nothing() {
        let mediator = Arc::new(MockMediator::new());
        mediator.fail_next_create_fpg();
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service(mediator.clone(), store.clone());

        let result = svc
            .create_fpg("backend1", "cpg1", "DockerFpg_1", 1024, false)
            .await;
        assert!(matches!(result, Err(ProvisionError::FpgCreationFailed { .. })));
        assert!(store.fpg_metadata("backend1", "cpg1", "DockerFpg_1").is_none());
        assert!(!mediator.has_fpg("DockerFpg_1"));
    }

    #[tokio::test]
    async fn test_increment_share_count_updates_quota_flag() {
        let mediator = Arc::new(MockMediator::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service(mediator, store.clone());

        svc.create_fpg("backend1", "cpg1", "DockerFpg_1", 1024, false)
            .await
            .unwrap();

        let meta = svc
            .increment_share_count("backend1", "cpg1", "DockerFpg_1", 2)
            .await
            .unwrap();
        assert_eq!(meta.share_count, 1);
        assert!(!meta.reached_full_capacity);

        let meta = svc
            .increment_share_count("backend1", "cpg1", "DockerFpg_1", 2)
            .await
            .unwrap();
        assert_eq!(meta.share_count, 2);
        assert!(meta.reached_full_capacity);
    }

    #[tokio::test]
    async fn test_increment_unknown_fpg_is_metadata_not_found() {
        let mediator = Arc::new(MockMediator::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service(mediator, store);

        let result = svc
            .increment_share_count("backend1", "cpg1", "missing", 16)
            .await;
        assert!(matches!(result, Err(ProvisionError::MetadataNotFound { .. })));
    }

    #[tokio::test]
    async fn test_adopt_legacy_fpg_takes_backend_cpg() {
        let mediator = Arc::new(MockMediator::new());
        mediator.seed_legacy_fpg(
            FpgInfo {
                name: "legacy1".to_string(),
                cpg: "real_cpg".to_string(),
                capacity_gib: 512,
            },
            VfsInfo {
                name: "legacy1_vfs".to_string(),
                ip_info: vec![IpInfo {
                    ip_addr: Ipv4Addr::new(10, 0, 0, 9),
                    netmask: Ipv4Addr::new(255, 255, 255, 0),
                }],
            },
        );
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service(mediator, store.clone());

        let meta = svc.adopt_legacy_fpg("backend1", "legacy1").await.unwrap();
        assert_eq!(meta.cpg, "real_cpg");
        assert_eq!(meta.share_count, 0);
        assert!(!meta.reached_full_capacity);
        assert_eq!(meta.vfs.as_deref(), Some("legacy1_vfs"));

        // Persisted under the backend's CPG, not the caller's
        assert!(store.fpg_metadata("backend1", "real_cpg", "legacy1").is_some());
    }

    #[tokio::test]
    async fn test_dismantle_clears_default_pointer_and_metadata() {
        let mediator = Arc::new(MockMediator::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        let svc = service(mediator.clone(), store.clone());

        svc.create_fpg("backend1", "cpg1", "DockerFpg_1", 1024, true)
            .await
            .unwrap();
        svc.dismantle_fpg("backend1", "cpg1", "DockerFpg_1")
            .await
            .unwrap();

        assert!(store.fpg_metadata("backend1", "cpg1", "DockerFpg_1").is_none());
        let backend_meta = store.backend_metadata("backend1").unwrap();
        assert!(backend_meta.default_fpg_for("cpg1").is_none());
        assert!(!mediator.has_fpg("DockerFpg_1"));

        // Dismantling again is harmless
        svc.dismantle_fpg("backend1", "cpg1", "DockerFpg_1")
            .await
            .unwrap();
    }
}
