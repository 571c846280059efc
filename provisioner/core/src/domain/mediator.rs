// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backend Mediator Trait - Anti-Corruption Layer for the storage array
//!
//! Abstracts the array's file-services API (share/FPG/VFS creation and
//! deletion) so the provisioning core never sees wire-level detail. The
//! concrete REST client ships separately; this crate consumes the trait and
//! provides a mock for development and testing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::domain::share::{Share, VfsIp};

/// FPG attributes as reported by the backend
///
/// Used during legacy adoption: the backend's record is the source of truth
/// for an FPG that was provisioned outside this system's bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FpgInfo {
    /// FPG name
    pub name: String,

    /// CPG the FPG actually draws from (may differ from what a caller
    /// supplied for a legacy FPG)
    pub cpg: String,

    /// Provisioned capacity in GiB
    pub capacity_gib: u64,
}

/// One address entry reported for a VFS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpInfo {
    pub ip_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// VFS attributes as reported by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VfsInfo {
    /// VFS name
    pub name: String,

    /// Addresses the VFS is reachable on
    pub ip_info: Vec<IpInfo>,
}

impl VfsInfo {
    /// The single export address of this VFS.
    ///
    /// One address per VFS is supported; a multi-homed VFS is rejected
    /// rather than silently picking whichever entry comes first.
    pub fn single_export_address(&self) -> Result<VfsIp, MediatorError> {
        match self.ip_info.as_slice() {
            [only] => Ok(VfsIp::new(only.ip_addr, only.netmask)),
            [] => Err(MediatorError::NotFound(format!(
                "VFS {} reports no export address",
                self.name
            ))),
            many => Err(MediatorError::MultiHomedVfs {
                vfs: self.name.clone(),
                count: many.len(),
            }),
        }
    }
}

/// Backend mediator trait abstracting the array's file-services operations
///
/// Implementations handle:
/// - Share creation/deletion
/// - FPG (capacity container) creation/deletion and lookup
/// - VFS creation/deletion and lookup
/// - Health monitoring
///
/// All operations are imperative calls against remote state; the saga layer
/// owns ordering and compensation.
#[async_trait]
pub trait BackendMediator: Send + Sync {
    /// Create a share on the backend; returns the backend-assigned id
    async fn create_share(&self, share: &Share) -> Result<String, MediatorError>;

    /// Delete a share from the backend
    async fn delete_share(&self, share: &Share) -> Result<(), MediatorError>;

    /// Create a capacity container on the given CPG
    async fn create_fpg(&self, cpg: &str, fpg: &str, size_gib: u64) -> Result<(), MediatorError>;

    /// Delete a capacity container
    async fn delete_fpg(&self, fpg: &str) -> Result<(), MediatorError>;

    /// Create a virtual file server bound to an FPG on the given address
    async fn create_vfs(
        &self,
        cpg: &str,
        fpg: &str,
        vfs: &str,
        vfs_ip: &VfsIp,
    ) -> Result<(), MediatorError>;

    /// Delete a virtual file server
    async fn delete_vfs(&self, fpg: &str, vfs: &str) -> Result<(), MediatorError>;

    /// Look up an FPG's real attributes on the backend
    async fn get_fpg(&self, fpg: &str) -> Result<FpgInfo, MediatorError>;

    /// Look up the VFS bound to an FPG
    async fn get_vfs(&self, fpg: &str) -> Result<VfsInfo, MediatorError>;

    /// Check health of the backend connection
    async fn health_check(&self) -> Result<(), MediatorError> {
        Ok(())
    }
}

/// Mediator errors
#[derive(Debug, Error)]
pub enum MediatorError {
    #[error("Not found on backend: {0}")]
    NotFound(String),

    #[error("Already exists on backend: {0}")]
    AlreadyExists(String),

    #[error("VFS {vfs} exposes {count} addresses, exactly one is supported")]
    MultiHomedVfs { vfs: String, count: usize },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout while communicating with backend")]
    Timeout,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl MediatorError {
    /// Whether the error means the resource is already gone, which a
    /// best-effort cleanup treats as success
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_export_address() {
        let vfs = VfsInfo {
            name: "vfs1".to_string(),
            ip_info: vec![IpInfo {
                ip_addr: Ipv4Addr::new(10, 0, 0, 5),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
            }],
        };
        let ip = vfs.single_export_address().unwrap();
        assert_eq!(ip.address, Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_multi_homed_vfs_is_rejected() {
        let vfs = VfsInfo {
            name: "vfs1".to_string(),
            ip_info: vec![
                IpInfo {
                    ip_addr: Ipv4Addr::new(10, 0, 0, 5),
                    netmask: Ipv4Addr::new(255, 255, 255, 0),
                },
                IpInfo {
                    ip_addr: Ipv4Addr::new(10, 0, 1, 5),
                    netmask: Ipv4Addr::new(255, 255, 255, 0),
                },
            ],
        };
        assert!(matches!(
            vfs.single_export_address(),
            Err(MediatorError::MultiHomedVfs { count: 2, .. })
        ));
    }

    #[test]
    fn test_vfs_without_address_is_rejected() {
        let vfs = VfsInfo {
            name: "vfs1".to_string(),
            ip_info: vec![],
        };
        assert!(matches!(
            vfs.single_export_address(),
            Err(MediatorError::NotFound(_))
        ));
    }
}
