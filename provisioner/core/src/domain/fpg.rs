// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File Provisioning Group (FPG) metadata
//!
//! An FPG is a capacity container on the storage backend. Each FPG is bound
//! to at most one virtual file server and carries a share-count quota; its
//! metadata record is the unit the named `(backend, fpg)` lock arbitrates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::share::VfsIp;

/// Capacity state derived from the share count
///
/// `share_count` is authoritative; `reached_full_capacity` is a cached flag
/// that is set when the count crosses the quota and never proactively
/// cleared. A deleted share elsewhere may reopen a slot, which the
/// default-FPG fallback scan discovers by re-checking counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityState {
    Open,
    Full,
}

/// FPG metadata record, keyed by `(backend, cpg, fpg)` in the metadata store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FpgMetadata {
    /// FPG name on the backend
    pub fpg: String,

    /// Backend the FPG lives on
    pub backend: String,

    /// Capacity pool group the FPG draws space from
    pub cpg: String,

    /// Provisioned capacity in GiB
    pub size_gib: u64,

    /// Bound virtual file server, if one has been created
    pub vfs: Option<String>,

    /// Export address of the bound VFS (one address per FPG is supported)
    pub vfs_ip: Option<VfsIp>,

    /// Number of shares currently provisioned on this FPG.
    /// Only mutated while the named `(backend, fpg)` lock is held.
    pub share_count: u32,

    /// Cached quota flag; set when `share_count` crosses the quota
    pub reached_full_capacity: bool,

    /// Whether this FPG was created as the default for its CPG
    pub default_for_cpg: bool,

    /// Creation/adoption timestamp
    pub created_at: DateTime<Utc>,
}

impl FpgMetadata {
    /// Metadata for a freshly created, empty FPG
    pub fn new(
        backend: impl Into<String>,
        cpg: impl Into<String>,
        fpg: impl Into<String>,
        size_gib: u64,
    ) -> Self {
        Self {
            fpg: fpg.into(),
            backend: backend.into(),
            cpg: cpg.into(),
            size_gib,
            vfs: None,
            vfs_ip: None,
            share_count: 0,
            reached_full_capacity: false,
            default_for_cpg: false,
            created_at: Utc::now(),
        }
    }

    /// Metadata synthesized for a legacy FPG discovered on the backend
    ///
    /// Legacy FPGs predate this system's bookkeeping; adoption records the
    /// backend's real attributes with an empty share count so future calls
    /// treat the FPG like any other.
    pub fn adopted(
        backend: impl Into<String>,
        cpg: impl Into<String>,
        fpg: impl Into<String>,
        size_gib: u64,
        vfs: impl Into<String>,
        vfs_ip: VfsIp,
    ) -> Self {
        let mut meta = Self::new(backend, cpg, fpg, size_gib);
        meta.vfs = Some(vfs.into());
        meta.vfs_ip = Some(vfs_ip);
        meta
    }

    /// Record the VFS binding once the virtual file server exists
    pub fn bind_vfs(&mut self, vfs: impl Into<String>, vfs_ip: VfsIp) {
        self.vfs = Some(vfs.into());
        self.vfs_ip = Some(vfs_ip);
    }

    /// Whether another share fits under the quota. Checks the authoritative
    /// count, not the cached flag.
    pub fn has_capacity(&self, max_shares: u32) -> bool {
        self.share_count < max_shares
    }

    /// Derived capacity state
    pub fn capacity_state(&self, max_shares: u32) -> CapacityState {
        if self.has_capacity(max_shares) {
            CapacityState::Open
        } else {
            CapacityState::Full
        }
    }

    /// Count one more share onto this FPG, updating the cached quota flag.
    /// Caller must hold the named `(backend, fpg)` lock.
    pub fn register_share(&mut self, max_shares: u32) -> u32 {
        self.share_count += 1;
        if self.share_count >= max_shares {
            self.reached_full_capacity = true;
        }
        self.share_count
    }

    /// The VFS name and export address shares on this FPG are served through
    pub fn export_target(&self) -> Result<(&str, &VfsIp), FpgError> {
        let vfs = self
            .vfs
            .as_deref()
            .ok_or_else(|| FpgError::NoVfsBound(self.fpg.clone()))?;
        let ip = self
            .vfs_ip
            .as_ref()
            .ok_or_else(|| FpgError::NoExportAddress(self.fpg.clone()))?;
        Ok((vfs, ip))
    }
}

/// Per-backend metadata record: maps each CPG to its current default FPG
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendMetadata {
    /// Backend identifier
    pub backend: String,

    /// CPG name -> name of the FPG the default strategy provisions onto
    #[serde(default)]
    pub default_fpgs: HashMap<String, String>,
}

impl BackendMetadata {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            default_fpgs: HashMap::new(),
        }
    }

    /// Current default FPG for a CPG, if one is configured
    pub fn default_fpg_for(&self, cpg: &str) -> Option<&str> {
        self.default_fpgs.get(cpg).map(String::as_str)
    }

    pub fn set_default_fpg(&mut self, cpg: impl Into<String>, fpg: impl Into<String>) {
        self.default_fpgs.insert(cpg.into(), fpg.into());
    }

    /// Drop the default pointer, but only if it still names `fpg`.
    /// A concurrent saga may have re-pointed the default in the meantime.
    pub fn clear_default_fpg(&mut self, cpg: &str, fpg: &str) {
        if self.default_fpg_for(cpg) == Some(fpg) {
            self.default_fpgs.remove(cpg);
        }
    }
}

#[derive(Debug, Error)]
pub enum FpgError {
    #[error("FPG {0} has no virtual file server bound")]
    NoVfsBound(String),

    #[error("FPG {0} has a VFS but no export address")]
    NoExportAddress(String),
}
