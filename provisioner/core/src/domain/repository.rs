// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Metadata Store Interfaces
//!
//! Persistence contracts for the provisioning records, following the
//! Repository pattern: one repository per record kind, interface defined in
//! the domain layer, implemented in `crate::infrastructure::metadata`.
//!
//! | Trait | Record | Key |
//! |-------|--------|-----|
//! | `ShareRepository` | `Share` | share name |
//! | `FpgRepository` | `FpgMetadata` | `(backend, cpg, fpg)` |
//! | `BackendRepository` | `BackendMetadata` | backend id |
//! | `IpPoolRepository` | per-backend address sets | `(backend, address)` |
//! | `LockManager` | named locks | `(backend, fpg)` |
//!
//! The store is consumed as a black box offering linearizable reads/writes
//! and mutual-exclusion locks; the in-memory implementation is used for
//! development and testing, an etcd-backed one ships separately.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

use crate::domain::fpg::{BackendMetadata, FpgMetadata};
use crate::domain::share::{Share, VfsIp};

/// Repository interface for Share records, keyed by name
#[async_trait]
pub trait ShareRepository: Send + Sync {
    /// Save share (create or update)
    async fn save(&self, share: &Share) -> Result<(), RepositoryError>;

    /// Find share by name
    async fn find_by_name(&self, name: &str) -> Result<Option<Share>, RepositoryError>;

    /// List all shares provisioned against a backend
    async fn list_by_backend(&self, backend: &str) -> Result<Vec<Share>, RepositoryError>;

    /// Delete share by name. Idempotent: deleting an absent record succeeds,
    /// so compensation can run more than once.
    async fn delete(&self, name: &str) -> Result<(), RepositoryError>;
}

/// Repository interface for FPG metadata, keyed by `(backend, cpg, fpg)`
#[async_trait]
pub trait FpgRepository: Send + Sync {
    /// Save FPG metadata (create or update)
    async fn save(&self, meta: &FpgMetadata) -> Result<(), RepositoryError>;

    /// Find FPG metadata
    async fn find(
        &self,
        backend: &str,
        cpg: &str,
        fpg: &str,
    ) -> Result<Option<FpgMetadata>, RepositoryError>;

    /// All FPG metadata for a CPG, in stable (name) order. Restartable scan,
    /// not cached.
    async fn list_by_cpg(
        &self,
        backend: &str,
        cpg: &str,
    ) -> Result<Vec<FpgMetadata>, RepositoryError>;

    /// Delete FPG metadata. Idempotent, see `ShareRepository::delete`.
    async fn delete(&self, backend: &str, cpg: &str, fpg: &str) -> Result<(), RepositoryError>;
}

/// Repository interface for per-backend metadata (default-FPG pointers)
#[async_trait]
pub trait BackendRepository: Send + Sync {
    /// Save backend metadata (create or update)
    async fn save(&self, meta: &BackendMetadata) -> Result<(), RepositoryError>;

    /// Find backend metadata
    async fn find(&self, backend: &str) -> Result<Option<BackendMetadata>, RepositoryError>;
}

/// IP reservation state transitions for a backend's address pool
///
/// Each address is in exactly one of three states: free (not recorded),
/// locked (claimed but not yet consumed), or in-use (a confirmed VFS owns
/// it). Transitions are atomic per address so two concurrent claimants can
/// never both take the same free address.
#[async_trait]
pub trait IpPoolRepository: Send + Sync {
    /// Atomically move an address from free to locked. Returns `false`
    /// without side effects when the address is already locked or in use.
    async fn try_lock_ip(&self, backend: &str, ip: &VfsIp) -> Result<bool, RepositoryError>;

    /// Move an address from locked to in-use. Idempotent: a no-op when the
    /// address is already in use.
    async fn mark_in_use(&self, backend: &str, address: Ipv4Addr) -> Result<(), RepositoryError>;

    /// Return an address to the free pool from either the locked or the
    /// in-use set. Idempotent: releasing a free address is a no-op.
    async fn release(&self, backend: &str, address: Ipv4Addr) -> Result<(), RepositoryError>;
}

/// Backend-specific lease state for a held named lock; the lock is released
/// when the lease is dropped
pub trait LockLease: Send {}

/// A held named lock on `(backend, fpg)`. Released on drop, so every exit
/// path out of a critical section releases the lock.
pub struct FpgLockGuard {
    backend: String,
    fpg: String,
    _lease: Box<dyn LockLease>,
}

impl FpgLockGuard {
    pub fn new(backend: impl Into<String>, fpg: impl Into<String>, lease: Box<dyn LockLease>) -> Self {
        Self {
            backend: backend.into(),
            fpg: fpg.into(),
            _lease: lease,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn fpg(&self) -> &str {
        &self.fpg
    }
}

impl Drop for FpgLockGuard {
    fn drop(&mut self) {
        debug!("Released FPG lock {}/{}", self.backend, self.fpg);
    }
}

impl std::fmt::Debug for FpgLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FpgLockGuard")
            .field("backend", &self.backend)
            .field("fpg", &self.fpg)
            .finish()
    }
}

/// Named distributed locks scoped to `(backend, fpg)`
///
/// Locks are not reentrant; a saga holds at most one FPG lock per attempt.
/// Acquisition must honor the timeout so an overloaded store surfaces a
/// retryable failure instead of wedging the caller.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn acquire_fpg_lock(
        &self,
        backend: &str,
        fpg: &str,
        timeout: Duration,
    ) -> Result<FpgLockGuard, LockError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Lock acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Timed out acquiring lock {backend}/{fpg}")]
    Timeout { backend: String, fpg: String },

    #[error("Lock backend error: {0}")]
    Backend(String),
}
