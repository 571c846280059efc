// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

// ============================================================================
// Value Objects
// ============================================================================

/// A single export address: the IP a virtual file server is reachable on,
/// together with its netmask.
///
/// Exactly one address per VFS is supported. The constraint is modeled as a
/// single value instead of a subnet-to-address map so there is no ambiguity
/// about which address a share is exported on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VfsIp {
    /// IPv4 address assigned to the VFS
    pub address: Ipv4Addr,

    /// Netmask of the subnet the address belongs to
    pub netmask: Ipv4Addr,
}

impl VfsIp {
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { address, netmask }
    }
}

impl std::fmt::Display for VfsIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.netmask)
    }
}

/// Share status lifecycle
///
/// A share record is persisted in `Creating` before any backend side effect
/// runs, so a crash mid-provisioning leaves diagnostic evidence rather than
/// silent loss. It only reaches `Available` after the backend confirms the
/// share exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShareStatus {
    /// Provisioning in flight; the record exists but the export does not yet
    Creating,
    /// Backend confirmed creation; the share is usable
    Available,
}

// ============================================================================
// Aggregate Root: Share
// ============================================================================

/// Share aggregate root
///
/// A provisioned network file export, keyed by name. Placement fields (FPG,
/// VFS, export address) are unset until a provisioning strategy selects or
/// creates the capacity container the share lands on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    /// Unique share name (primary key in the metadata store)
    pub name: String,

    /// Backend the share is provisioned against
    pub backend: String,

    /// Capacity pool group the owning FPG draws space from
    pub cpg: String,

    /// Requested size in GiB
    pub size_gib: u64,

    /// Current lifecycle status
    pub status: ShareStatus,

    /// Owning file provisioning group (set once placement is decided)
    pub fpg: Option<String>,

    /// Owning virtual file server (set once placement is decided)
    pub vfs: Option<String>,

    /// Export address of the owning VFS (set once placement is decided)
    pub vfs_ip: Option<VfsIp>,

    /// Backend-assigned share identifier (set on successful creation)
    pub backend_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Share {
    /// Create a new share record in `Creating` status (aggregate factory)
    pub fn new(
        name: impl Into<String>,
        backend: impl Into<String>,
        cpg: impl Into<String>,
        size_gib: u64,
    ) -> Result<Self, ShareError> {
        let name = name.into();
        let backend = backend.into();
        let cpg = cpg.into();

        if name.trim().is_empty() {
            return Err(ShareError::InvalidName("Share name cannot be empty".to_string()));
        }
        if backend.trim().is_empty() {
            return Err(ShareError::InvalidBackend(
                "Backend identifier cannot be empty".to_string(),
            ));
        }
        if cpg.trim().is_empty() {
            return Err(ShareError::InvalidCpg("CPG name cannot be empty".to_string()));
        }
        if size_gib == 0 {
            return Err(ShareError::InvalidSize(
                "Share size must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            name,
            backend,
            cpg,
            size_gib,
            status: ShareStatus::Creating,
            fpg: None,
            vfs: None,
            vfs_ip: None,
            backend_id: None,
            created_at: Utc::now(),
        })
    }

    // ========================================================================
    // Aggregate Commands (State Mutations)
    // ========================================================================

    /// Record the placement decided by a provisioning strategy
    pub fn place(&mut self, fpg: impl Into<String>, vfs: impl Into<String>, vfs_ip: VfsIp) {
        self.fpg = Some(fpg.into());
        self.vfs = Some(vfs.into());
        self.vfs_ip = Some(vfs_ip);
    }

    /// Mark the share available after the backend confirmed creation
    ///
    /// Requires placement to be recorded first; an unplaced share cannot be
    /// reachable by any client.
    pub fn mark_available(&mut self, backend_id: impl Into<String>) -> Result<(), ShareError> {
        if self.status != ShareStatus::Creating {
            return Err(ShareError::InvalidStateTransition {
                from: self.status,
                to: ShareStatus::Available,
            });
        }
        if self.fpg.is_none() || self.vfs.is_none() || self.vfs_ip.is_none() {
            return Err(ShareError::NotPlaced(self.name.clone()));
        }
        self.backend_id = Some(backend_id.into());
        self.status = ShareStatus::Available;
        Ok(())
    }

    // ========================================================================
    // Aggregate Queries (State Inspection)
    // ========================================================================

    /// Check if the share completed provisioning
    pub fn is_available(&self) -> bool {
        self.status == ShareStatus::Available
    }

    /// Placement triple, if placement has been recorded
    pub fn placement(&self) -> Option<(&str, &str, &VfsIp)> {
        match (&self.fpg, &self.vfs, &self.vfs_ip) {
            (Some(fpg), Some(vfs), Some(ip)) => Some((fpg, vfs, ip)),
            _ => None,
        }
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Invalid share name: {0}")]
    InvalidName(String),

    #[error("Invalid backend: {0}")]
    InvalidBackend(String),

    #[error("Invalid CPG: {0}")]
    InvalidCpg(String),

    #[error("Invalid share size: {0}")]
    InvalidSize(String),

    #[error("Share {0} has no placement (FPG/VFS/IP not assigned)")]
    NotPlaced(String),

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: ShareStatus, to: ShareStatus },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ip() -> VfsIp {
        VfsIp::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0))
    }

    #[test]
    fn test_share_creation() {
        let share = Share::new("share1", "backend1", "cpg1", 10).unwrap();
        assert_eq!(share.status, ShareStatus::Creating);
        assert!(share.fpg.is_none());
        assert!(share.placement().is_none());
    }

    #[test]
    fn test_share_creation_rejects_bad_input() {
        assert!(Share::new("", "backend1", "cpg1", 10).is_err());
        assert!(Share::new("share1", " ", "cpg1", 10).is_err());
        assert!(Share::new("share1", "backend1", "", 10).is_err());
        assert!(Share::new("share1", "backend1", "cpg1", 0).is_err());
    }

    #[test]
    fn test_mark_available_requires_placement() {
        let mut share = Share::new("share1", "backend1", "cpg1", 10).unwrap();
        assert!(matches!(
            share.mark_available("id-1"),
            Err(ShareError::NotPlaced(_))
        ));

        share.place("fpg1", "vfs1", test_ip());
        share.mark_available("id-1").unwrap();
        assert!(share.is_available());
        assert_eq!(share.backend_id.as_deref(), Some("id-1"));
    }

    #[test]
    fn test_mark_available_twice_is_rejected() {
        let mut share = Share::new("share1", "backend1", "cpg1", 10).unwrap();
        share.place("fpg1", "vfs1", test_ip());
        share.mark_available("id-1").unwrap();
        assert!(matches!(
            share.mark_available("id-2"),
            Err(ShareError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_placement_round_trip() {
        let mut share = Share::new("share1", "backend1", "cpg1", 10).unwrap();
        share.place("fpg1", "vfs1", test_ip());
        let (fpg, vfs, ip) = share.placement().unwrap();
        assert_eq!(fpg, "fpg1");
        assert_eq!(vfs, "vfs1");
        assert_eq!(ip.address, Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_status_serialization_uses_uppercase() {
        let json = serde_json::to_string(&ShareStatus::Creating).unwrap();
        assert_eq!(json, "\"CREATING\"");
        let json = serde_json::to_string(&ShareStatus::Available).unwrap();
        assert_eq!(json, "\"AVAILABLE\"");
    }
}
