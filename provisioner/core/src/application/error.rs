// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Provisioning error taxonomy
//!
//! Every public entry point either returns a completed, AVAILABLE share or
//! exactly one of these errors, raised only after compensation has run. The
//! `Store` and `Mediator` variants are internal plumbing; the saga
//! normalizes them into `ShareCreationFailed` before they reach a caller.

use thiserror::Error;

use crate::domain::mediator::MediatorError;
use crate::domain::repository::{LockError, RepositoryError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Terminal, user-visible failure; wraps any lower failure once
    /// compensation has run
    #[error("Share creation failed [share: {share}, backend: {backend}]: {reason}")]
    ShareCreationFailed {
        share: String,
        backend: String,
        reason: String,
    },

    #[error("FPG creation failed [fpg: {fpg}]: {reason}")]
    FpgCreationFailed { fpg: String, reason: String },

    #[error("VFS creation failed [vfs: {vfs}]: {reason}")]
    VfsCreationFailed { vfs: String, reason: String },

    /// The backend's address pool has no free address left. Nothing was
    /// claimed, so no compensation is attached to this error itself.
    #[error("No free IP address available on backend {backend}")]
    IpPoolExhausted { backend: String },

    /// The targeted FPG is already at its share-count quota
    #[error("FPG {fpg} has reached the maximum of {max} shares")]
    CapacityLimitReached { fpg: String, max: u32 },

    #[error("No default FPG configured for CPG {cpg}")]
    DefaultFpgNotConfigured { cpg: String },

    /// A metadata record is absent. Not always user-visible: for an explicit
    /// FPG this is the signal to switch to the legacy adoption path.
    #[error("Metadata not found: {key}")]
    MetadataNotFound { key: String },

    /// Lock acquisition timed out; retryable
    #[error("Timed out acquiring lock for FPG {fpg} on backend {backend}")]
    LockTimeout { backend: String, fpg: String },

    /// Internal: metadata store failure, normalized before surfacing
    #[error(transparent)]
    Store(#[from] RepositoryError),

    /// Internal: backend mediator failure, normalized before surfacing
    #[error(transparent)]
    Mediator(#[from] MediatorError),
}

impl ProvisionError {
    /// Whether retrying the same request may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<LockError> for ProvisionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { backend, fpg } => Self::LockTimeout { backend, fpg },
            LockError::Backend(reason) => Self::Store(RepositoryError::Store(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_is_retryable() {
        let err: ProvisionError = LockError::Timeout {
            backend: "backend1".to_string(),
            fpg: "fpg1".to_string(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(matches!(err, ProvisionError::LockTimeout { .. }));
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        let err = ProvisionError::IpPoolExhausted {
            backend: "backend1".to_string(),
        };
        assert!(!err.is_retryable());
    }
}
