// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Share Provisioning Application Service
//!
//! Orchestrates share provisioning as a saga: a chain of ordered side
//! effects against the backend and the metadata store, with an explicit
//! compensation stack that is folded in reverse the moment any later step
//! fails. Three strategies are offered:
//!
//! - **New FPG**: create a fresh capacity container, claim an address,
//!   bind a VFS, then create the share.
//! - **Default FPG**: place the share on the CPG's default container,
//!   falling back to a scan over system-created containers with spare
//!   capacity when the default path fails.
//! - **Existing FPG**: place the share on a caller-named container,
//!   adopting it into the metadata store first when it predates this
//!   system's bookkeeping.
//!
//! Every entry point either returns a completed, AVAILABLE share or raises
//! exactly one taxonomy error after compensation has run; callers never
//! clean up anything themselves.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::compensation::{CompensationStack, CompensationStep};
use crate::application::error::ProvisionError;
use crate::application::fpg_lifecycle::FpgLifecycleService;
use crate::application::ip_claim::IpClaimCoordinator;
use crate::application::vfs_lifecycle::VfsLifecycleService;
use crate::domain::config::ProvisionerConfig;
use crate::domain::events::ProvisioningEvent;
use crate::domain::fpg::FpgMetadata;
use crate::domain::mediator::BackendMediator;
use crate::domain::repository::{
    BackendRepository, FpgRepository, IpPoolRepository, LockManager, ShareRepository,
};
use crate::domain::share::Share;
use crate::infrastructure::event_bus::EventBus;

// ============================================================================
// Request
// ============================================================================

/// Parameters for one provisioning request
#[derive(Debug, Clone)]
pub struct ShareRequest {
    /// Share name (unique key)
    pub name: String,

    /// Target backend
    pub backend: String,

    /// CPG to draw capacity from
    pub cpg: String,

    /// Requested share size in GiB
    pub size_gib: u64,

    /// FPG name: required for the existing-FPG strategy, optional naming
    /// override for the new-FPG strategy
    pub fpg: Option<String>,

    /// VFS naming override for the new-FPG strategy
    pub vfs: Option<String>,
}

impl ShareRequest {
    pub fn new(
        name: impl Into<String>,
        backend: impl Into<String>,
        cpg: impl Into<String>,
        size_gib: u64,
    ) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            cpg: cpg.into(),
            size_gib,
            fpg: None,
            vfs: None,
        }
    }

    pub fn with_fpg(mut self, fpg: impl Into<String>) -> Self {
        self.fpg = Some(fpg.into());
        self
    }

    pub fn with_vfs(mut self, vfs: impl Into<String>) -> Self {
        self.vfs = Some(vfs.into());
        self
    }
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait ShareProvisioningService: Send + Sync {
    /// Provision a share on a freshly created FPG
    async fn provision_on_new_fpg(
        &self,
        request: ShareRequest,
        make_default: bool,
    ) -> Result<Share, ProvisionError>;

    /// Provision a share on the CPG's default FPG, scanning system-created
    /// FPGs for spare capacity when the default path fails
    async fn provision_on_default_fpg(&self, request: ShareRequest)
        -> Result<Share, ProvisionError>;

    /// Provision a share on a caller-named FPG, adopting a legacy FPG into
    /// the metadata store when no record exists for it
    async fn provision_on_existing_fpg(
        &self,
        request: ShareRequest,
    ) -> Result<Share, ProvisionError>;

    /// Get a share record by name
    async fn get_share(&self, name: &str) -> Result<Option<Share>, ProvisionError>;

    /// List all share records for a backend
    async fn list_shares(&self, backend: &str) -> Result<Vec<Share>, ProvisionError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardShareProvisioningService {
    config: ProvisionerConfig,
    mediator: Arc<dyn BackendMediator>,
    shares: Arc<dyn ShareRepository>,
    fpgs: Arc<dyn FpgRepository>,
    backends: Arc<dyn BackendRepository>,
    ip_pool: Arc<dyn IpPoolRepository>,
    locks: Arc<dyn LockManager>,
    event_bus: Arc<EventBus>,
    fpg_lifecycle: FpgLifecycleService,
    vfs_lifecycle: VfsLifecycleService,
}

impl StandardShareProvisioningService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProvisionerConfig,
        mediator: Arc<dyn BackendMediator>,
        shares: Arc<dyn ShareRepository>,
        fpgs: Arc<dyn FpgRepository>,
        backends: Arc<dyn BackendRepository>,
        ip_pool: Arc<dyn IpPoolRepository>,
        locks: Arc<dyn LockManager>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let fpg_lifecycle =
            FpgLifecycleService::new(mediator.clone(), fpgs.clone(), backends.clone());
        let vfs_lifecycle = VfsLifecycleService::new(mediator.clone());
        Self {
            config,
            mediator,
            shares,
            fpgs,
            backends,
            ip_pool,
            locks,
            event_bus,
            fpg_lifecycle,
            vfs_lifecycle,
        }
    }

    // ------------------------------------------------------------------
    // Saga plumbing
    // ------------------------------------------------------------------

    /// Persist the share in CREATING status before any side effect runs.
    /// A crash mid-saga then leaves diagnostic evidence instead of silent
    /// loss.
    async fn begin_saga(&self, request: &ShareRequest) -> Result<Share, ProvisionError> {
        let share = Share::new(
            request.name.clone(),
            request.backend.clone(),
            request.cpg.clone(),
            request.size_gib,
        )
        .map_err(|e| ProvisionError::ShareCreationFailed {
            share: request.name.clone(),
            backend: request.backend.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = self.shares.save(&share).await {
            return Err(ProvisionError::ShareCreationFailed {
                share: share.name.clone(),
                backend: share.backend.clone(),
                reason: e.to_string(),
            });
        }

        self.event_bus.publish(ProvisioningEvent::ShareCreating {
            share: share.name.clone(),
            backend: share.backend.clone(),
            cpg: share.cpg.clone(),
            at: Utc::now(),
        });
        Ok(share)
    }

    /// Fold the compensation stack in reverse execution order. Step
    /// failures are logged, never propagated; the dominant error stays the
    /// one that triggered the unwind.
    async fn unwind(&self, share: &Share, stack: CompensationStack) {
        if stack.is_empty() {
            return;
        }
        let steps = stack.len();
        info!(
            "Unwinding {} provisioning steps for share {}",
            steps, share.name
        );
        for step in stack.drain_reverse() {
            info!("Compensating: {}", step);
            let result = match &step {
                CompensationStep::ReleaseIp { backend, vfs_ip } => {
                    match self.ip_pool.release(backend, vfs_ip.address).await {
                        Ok(()) => {
                            self.event_bus.publish(ProvisioningEvent::IpReleased {
                                backend: backend.clone(),
                                vfs_ip: vfs_ip.clone(),
                                at: Utc::now(),
                            });
                            Ok(())
                        }
                        Err(e) => Err(ProvisionError::from(e)),
                    }
                }
                CompensationStep::DeleteVfs { fpg, vfs, .. } => self
                    .vfs_lifecycle
                    .delete_vfs(fpg, vfs)
                    .await
                    .map_err(ProvisionError::from),
                CompensationStep::DeleteFpg { backend, cpg, fpg } => {
                    self.fpg_lifecycle.dismantle_fpg(backend, cpg, fpg).await
                }
            };
            if let Err(e) = result {
                warn!(
                    "Compensation step failed for share {} ({}): {}",
                    share.name, step, e
                );
            }
        }
        self.event_bus.publish(ProvisioningEvent::CompensationCompleted {
            share: share.name.clone(),
            backend: share.backend.clone(),
            steps,
            at: Utc::now(),
        });
    }

    /// Final bookkeeping of a failed saga: drop the CREATING/failed record,
    /// normalize the error into the public taxonomy, and emit the failure
    /// event. Compensation must already have run.
    async fn settle_failure(&self, share: &Share, err: ProvisionError) -> ProvisionError {
        if let Err(e) = self.shares.delete(&share.name).await {
            warn!("Failed to delete record for share {}: {}", share.name, e);
        }
        let err = self.normalize(share, err);
        error!("Provisioning share {} failed: {}", share.name, err);
        self.event_bus.publish(ProvisioningEvent::ShareCreationFailed {
            share: share.name.clone(),
            backend: share.backend.clone(),
            reason: err.to_string(),
            at: Utc::now(),
        });
        err
    }

    /// Internal store/mediator failures surface as `ShareCreationFailed`;
    /// taxonomy errors pass through untouched.
    fn normalize(&self, share: &Share, err: ProvisionError) -> ProvisionError {
        match err {
            e @ (ProvisionError::Store(_) | ProvisionError::Mediator(_)) => {
                ProvisionError::ShareCreationFailed {
                    share: share.name.clone(),
                    backend: share.backend.clone(),
                    reason: e.to_string(),
                }
            }
            other => other,
        }
    }

    /// Strategy-level wrapping for the new-FPG path: container and VFS
    /// failures surface as `ShareCreationFailed`, while pool exhaustion and
    /// lock timeouts keep their own identity.
    fn wrap_for_saga(&self, share: &Share, err: ProvisionError) -> ProvisionError {
        match err {
            e @ (ProvisionError::IpPoolExhausted { .. }
            | ProvisionError::LockTimeout { .. }
            | ProvisionError::ShareCreationFailed { .. }) => e,
            e => ProvisionError::ShareCreationFailed {
                share: share.name.clone(),
                backend: share.backend.clone(),
                reason: e.to_string(),
            },
        }
    }

    /// Shared final step of every strategy. Caller must hold the lock of
    /// the FPG the share lands on; the count increment relies on it.
    ///
    /// On failure the attempt's stack is unwound and, when the backend
    /// share already exists, it is deleted best-effort. The CREATING record
    /// is left for the caller to settle so the default-FPG fallback can
    /// retry on another container.
    async fn finalize(
        &self,
        share: &mut Share,
        stack: CompensationStack,
    ) -> Result<(), ProvisionError> {
        let (fpg_name, vfs_name, vfs_ip) = match share.placement() {
            Some((fpg, vfs, ip)) => (fpg.to_string(), vfs.to_string(), ip.clone()),
            None => {
                self.unwind(share, stack).await;
                return Err(ProvisionError::ShareCreationFailed {
                    share: share.name.clone(),
                    backend: share.backend.clone(),
                    reason: "share has no placement".to_string(),
                });
            }
        };

        let backend_id = match self.mediator.create_share(share).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    "Share creation failed [share: {}, error: {}]",
                    share.name, e
                );
                self.unwind(share, stack).await;
                return Err(ProvisionError::ShareCreationFailed {
                    share: share.name.clone(),
                    backend: share.backend.clone(),
                    reason: e.to_string(),
                });
            }
        };

        if let Err(e) = self.record_available(share, &backend_id, &fpg_name).await {
            error!(
                "Share bookkeeping failed [share: {}, error: {}]",
                share.name, e
            );
            // Best-effort backend cleanup; the original failure stays
            // dominant over any secondary cleanup failure.
            if let Err(cleanup) = self.mediator.delete_share(share).await {
                warn!(
                    "Failed to delete share {} on backend after bookkeeping failure: {}",
                    share.name, cleanup
                );
            }
            self.unwind(share, stack).await;
            return Err(ProvisionError::ShareCreationFailed {
                share: share.name.clone(),
                backend: share.backend.clone(),
                reason: e.to_string(),
            });
        }

        info!(
            "Share {} is AVAILABLE on FPG {} (vfs: {}, ip: {})",
            share.name, fpg_name, vfs_name, vfs_ip
        );
        self.event_bus.publish(ProvisioningEvent::ShareAvailable {
            share: share.name.clone(),
            backend: share.backend.clone(),
            fpg: fpg_name,
            vfs: vfs_name,
            vfs_ip,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn record_available(
        &self,
        share: &mut Share,
        backend_id: &str,
        fpg_name: &str,
    ) -> Result<(), ProvisionError> {
        share
            .mark_available(backend_id)
            .map_err(|e| ProvisionError::ShareCreationFailed {
                share: share.name.clone(),
                backend: share.backend.clone(),
                reason: e.to_string(),
            })?;
        self.shares.save(share).await?;
        self.fpg_lifecycle
            .increment_share_count(
                &share.backend,
                &share.cpg,
                fpg_name,
                self.config.max_shares_per_fpg,
            )
            .await?;
        Ok(())
    }

    /// Place a share on an FPG that already has a VFS bound. Works on a
    /// clone of the CREATING record so a failed attempt leaves the original
    /// intact for the fallback scan.
    async fn provision_on_open_fpg(
        &self,
        share: &Share,
        meta: &FpgMetadata,
    ) -> Result<Share, ProvisionError> {
        let (vfs, vfs_ip) = match meta.export_target() {
            Ok((vfs, ip)) => (vfs.to_string(), ip.clone()),
            Err(e) => {
                return Err(ProvisionError::ShareCreationFailed {
                    share: share.name.clone(),
                    backend: share.backend.clone(),
                    reason: e.to_string(),
                })
            }
        };
        let mut attempt = share.clone();
        // A legacy FPG's true CPG overrides whatever the caller supplied
        attempt.cpg = meta.cpg.clone();
        attempt.place(&meta.fpg, &vfs, vfs_ip);
        self.finalize(&mut attempt, CompensationStack::new()).await?;
        Ok(attempt)
    }

    // ------------------------------------------------------------------
    // Strategy: default FPG
    // ------------------------------------------------------------------

    async fn try_default_fpg(&self, share: &Share) -> Result<Share, ProvisionError> {
        let fpg_name = self
            .backends
            .find(&share.backend)
            .await?
            .and_then(|meta| meta.default_fpg_for(&share.cpg).map(str::to_string))
            .ok_or_else(|| ProvisionError::DefaultFpgNotConfigured {
                cpg: share.cpg.clone(),
            })?;

        // Optimistic pre-check before taking the lock; the re-read under
        // the lock stays authoritative.
        let meta = self
            .fpgs
            .find(&share.backend, &share.cpg, &fpg_name)
            .await?
            .ok_or_else(|| ProvisionError::MetadataNotFound {
                key: format!("{}/{}/{}", share.backend, share.cpg, fpg_name),
            })?;
        if !meta.has_capacity(self.config.max_shares_per_fpg) {
            return Err(ProvisionError::CapacityLimitReached {
                fpg: fpg_name,
                max: self.config.max_shares_per_fpg,
            });
        }

        let _guard = self
            .locks
            .acquire_fpg_lock(&share.backend, &fpg_name, self.config.lock_timeout())
            .await?;
        let meta = self
            .fpgs
            .find(&share.backend, &share.cpg, &fpg_name)
            .await?
            .ok_or_else(|| ProvisionError::MetadataNotFound {
                key: format!("{}/{}/{}", share.backend, share.cpg, fpg_name),
            })?;
        if !meta.has_capacity(self.config.max_shares_per_fpg) {
            return Err(ProvisionError::CapacityLimitReached {
                fpg: fpg_name,
                max: self.config.max_shares_per_fpg,
            });
        }
        self.provision_on_open_fpg(share, &meta).await
    }

    /// A share on some full FPG may have been deleted, leaving an open
    /// slot. Re-check every system-created FPG of the CPG under its own
    /// lock and take the first one with spare capacity.
    async fn scan_for_open_fpg(&self, share: &Share) -> Result<Option<Share>, ProvisionError> {
        let candidates = self.fpgs.list_by_cpg(&share.backend, &share.cpg).await?;
        for candidate in candidates {
            if !self.config.owns_fpg(&candidate.fpg) {
                continue;
            }
            let guard = self
                .locks
                .acquire_fpg_lock(&share.backend, &candidate.fpg, self.config.lock_timeout())
                .await?;
            let fresh = self
                .fpgs
                .find(&share.backend, &candidate.cpg, &candidate.fpg)
                .await?;
            if let Some(fresh) = fresh {
                if fresh.has_capacity(self.config.max_shares_per_fpg) {
                    let placed = self.provision_on_open_fpg(share, &fresh).await?;
                    return Ok(Some(placed));
                }
            }
            drop(guard);
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Strategy: existing FPG
    // ------------------------------------------------------------------

    async fn try_existing_fpg(
        &self,
        share: &Share,
        fpg_name: &str,
    ) -> Result<Share, ProvisionError> {
        let _guard = self
            .locks
            .acquire_fpg_lock(&share.backend, fpg_name, self.config.lock_timeout())
            .await?;

        let meta = match self
            .fpgs
            .find(&share.backend, &share.cpg, fpg_name)
            .await?
        {
            Some(meta) => meta,
            None => {
                // No record: a legacy FPG provisioned outside this
                // system's bookkeeping. Adopt it before proceeding.
                let meta = self
                    .fpg_lifecycle
                    .adopt_legacy_fpg(&share.backend, fpg_name)
                    .await?;
                self.event_bus.publish(ProvisioningEvent::LegacyFpgAdopted {
                    fpg: meta.fpg.clone(),
                    cpg: meta.cpg.clone(),
                    backend: meta.backend.clone(),
                    at: Utc::now(),
                });
                meta
            }
        };
        self.provision_on_open_fpg(share, &meta).await
    }
}

#[async_trait]
impl ShareProvisioningService for StandardShareProvisioningService {
    // ------------------------------------------------------------------
    // Strategy: new FPG
    // ------------------------------------------------------------------

    async fn provision_on_new_fpg(
        &self,
        request: ShareRequest,
        make_default: bool,
    ) -> Result<Share, ProvisionError> {
        let mut share = self.begin_saga(&request).await?;
        let mut stack = CompensationStack::new();

        let fpg_name = request
            .fpg
            .clone()
            .unwrap_or_else(|| self.config.generate_fpg_name());
        let vfs_name = request
            .vfs
            .clone()
            .unwrap_or_else(|| ProvisionerConfig::vfs_name_for(&fpg_name));

        info!(
            "Provisioning share {} on new FPG {} (backend: {}, default: {})",
            share.name, fpg_name, share.backend, make_default
        );

        // The lock span runs from container creation through the final
        // count increment: the fresh FPG must not be visible to another
        // saga between those points.
        let guard = match self
            .locks
            .acquire_fpg_lock(&share.backend, &fpg_name, self.config.lock_timeout())
            .await
        {
            Ok(guard) => guard,
            Err(e) => return Err(self.settle_failure(&share, e.into()).await),
        };

        let mut fpg_meta = match self
            .fpg_lifecycle
            .create_fpg(
                &share.backend,
                &share.cpg,
                &fpg_name,
                self.config.default_fpg_size_gib,
                make_default,
            )
            .await
        {
            Ok(meta) => {
                stack.push(CompensationStep::DeleteFpg {
                    backend: share.backend.clone(),
                    cpg: share.cpg.clone(),
                    fpg: fpg_name.clone(),
                });
                self.event_bus.publish(ProvisioningEvent::FpgCreated {
                    fpg: fpg_name.clone(),
                    cpg: share.cpg.clone(),
                    backend: share.backend.clone(),
                    default_for_cpg: make_default,
                    at: Utc::now(),
                });
                meta
            }
            Err(e) => {
                let err = self.wrap_for_saga(&share, e);
                self.unwind(&share, stack).await;
                return Err(self.settle_failure(&share, err).await);
            }
        };

        let mut ip_claim = IpClaimCoordinator::new(&share.backend, self.ip_pool.clone());
        let claim_result = match self.config.backend(&share.backend) {
            Some(backend_config) => ip_claim.claim(backend_config).await,
            None => Err(ProvisionError::IpPoolExhausted {
                backend: share.backend.clone(),
            }),
        };
        let vfs_ip = match claim_result {
            Ok(vfs_ip) => {
                stack.push(CompensationStep::ReleaseIp {
                    backend: share.backend.clone(),
                    vfs_ip: vfs_ip.clone(),
                });
                self.event_bus.publish(ProvisioningEvent::IpClaimed {
                    backend: share.backend.clone(),
                    vfs_ip: vfs_ip.clone(),
                    at: Utc::now(),
                });
                vfs_ip
            }
            Err(e) => {
                let err = self.wrap_for_saga(&share, e);
                self.unwind(&share, stack).await;
                return Err(self.settle_failure(&share, err).await);
            }
        };

        match self
            .vfs_lifecycle
            .create_vfs(&share.cpg, &fpg_name, &vfs_name, &vfs_ip)
            .await
        {
            Ok(()) => {
                stack.push(CompensationStep::DeleteVfs {
                    cpg: share.cpg.clone(),
                    fpg: fpg_name.clone(),
                    vfs: vfs_name.clone(),
                });
                self.event_bus.publish(ProvisioningEvent::VfsCreated {
                    vfs: vfs_name.clone(),
                    fpg: fpg_name.clone(),
                    vfs_ip: vfs_ip.clone(),
                    at: Utc::now(),
                });
            }
            Err(e) => {
                let err = self.wrap_for_saga(&share, e);
                self.unwind(&share, stack).await;
                return Err(self.settle_failure(&share, err).await);
            }
        }

        // The confirmed VFS now owns the address: graduate it to in-use.
        // Not undone on its own; ReleaseIp reverses from either set once
        // the VFS is torn down.
        if let Err(e) = ip_claim.mark_in_use().await {
            let err = self.wrap_for_saga(&share, e);
            self.unwind(&share, stack).await;
            return Err(self.settle_failure(&share, err).await);
        }

        // Record the binding on the FPG metadata, still under the lock
        fpg_meta.bind_vfs(&vfs_name, vfs_ip.clone());
        if let Err(e) = self.fpgs.save(&fpg_meta).await {
            let err = self.wrap_for_saga(&share, e.into());
            self.unwind(&share, stack).await;
            return Err(self.settle_failure(&share, err).await);
        }

        share.place(&fpg_name, &vfs_name, vfs_ip);
        if let Err(e) = self.finalize(&mut share, stack).await {
            return Err(self.settle_failure(&share, e).await);
        }
        drop(guard);
        Ok(share)
    }

    async fn provision_on_default_fpg(
        &self,
        request: ShareRequest,
    ) -> Result<Share, ProvisionError> {
        let share = self.begin_saga(&request).await?;

        match self.try_default_fpg(&share).await {
            Ok(placed) => Ok(placed),
            Err(primary) => {
                warn!(
                    "Default FPG path failed for share {}: {}. Scanning for an open system-created FPG.",
                    share.name, primary
                );
                match self.scan_for_open_fpg(&share).await {
                    Ok(Some(placed)) => {
                        info!(
                            "Fallback placed share {} on FPG {}",
                            placed.name,
                            placed.fpg.as_deref().unwrap_or("-")
                        );
                        Ok(placed)
                    }
                    Ok(None) => Err(self.settle_failure(&share, primary).await),
                    // The scan's own failure is logged and discarded; the
                    // default path's error is the actionable one.
                    Err(scan_err) => {
                        warn!(
                            "Fallback scan failed for share {}: {}",
                            share.name, scan_err
                        );
                        Err(self.settle_failure(&share, primary).await)
                    }
                }
            }
        }
    }

    async fn provision_on_existing_fpg(
        &self,
        request: ShareRequest,
    ) -> Result<Share, ProvisionError> {
        let fpg_name = match request.fpg.clone() {
            Some(fpg) => fpg,
            None => {
                return Err(ProvisionError::ShareCreationFailed {
                    share: request.name.clone(),
                    backend: request.backend.clone(),
                    reason: "no FPG specified for existing-FPG provisioning".to_string(),
                })
            }
        };
        let share = self.begin_saga(&request).await?;

        match self.try_existing_fpg(&share, &fpg_name).await {
            Ok(placed) => Ok(placed),
            Err(e) => Err(self.settle_failure(&share, e).await),
        }
    }

    async fn get_share(&self, name: &str) -> Result<Option<Share>, ProvisionError> {
        Ok(self.shares.find_by_name(name).await?)
    }

    async fn list_shares(&self, backend: &str) -> Result<Vec<Share>, ProvisionError> {
        Ok(self.shares.list_by_backend(backend).await?)
    }
}
