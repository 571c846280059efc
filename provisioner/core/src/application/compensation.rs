// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Compensation stack for the provisioning saga
//!
//! Every side effect a saga performs against the backend or the metadata
//! store pushes one reversible step. On failure the saga folds the stack in
//! reverse, undoing each effect; a step is only pushed after its forward
//! action succeeded, and every step's reversal is idempotent. The step
//! repertoire is small and fixed, so a closed enum replaces heterogeneous
//! command objects.

use serde::{Deserialize, Serialize};

use crate::domain::share::VfsIp;

/// One reversible side effect, carrying just enough data to undo itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompensationStep {
    /// Return a claimed address (locked or in-use) to the free pool
    ReleaseIp { backend: String, vfs_ip: VfsIp },

    /// Tear down a virtual file server created by this saga
    DeleteVfs {
        cpg: String,
        fpg: String,
        vfs: String,
    },

    /// Tear down a capacity container created by this saga, including its
    /// metadata and any default pointer it registered
    DeleteFpg {
        backend: String,
        cpg: String,
        fpg: String,
    },
}

impl std::fmt::Display for CompensationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReleaseIp { backend, vfs_ip } => {
                write!(f, "release IP {} on backend {}", vfs_ip, backend)
            }
            Self::DeleteVfs { fpg, vfs, .. } => write!(f, "delete VFS {} on FPG {}", vfs, fpg),
            Self::DeleteFpg { backend, fpg, .. } => {
                write!(f, "delete FPG {} on backend {}", fpg, backend)
            }
        }
    }
}

/// Ordered record of the side effects a saga has performed
#[derive(Debug, Default)]
pub struct CompensationStack {
    steps: Vec<CompensationStep>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed, reversible side effect
    pub fn push(&mut self, step: CompensationStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Consume the stack in reverse execution order (most recent effect
    /// first)
    pub fn drain_reverse(self) -> impl Iterator<Item = CompensationStep> {
        self.steps.into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_drain_reverses_execution_order() {
        let mut stack = CompensationStack::new();
        stack.push(CompensationStep::DeleteFpg {
            backend: "backend1".to_string(),
            cpg: "cpg1".to_string(),
            fpg: "fpg1".to_string(),
        });
        stack.push(CompensationStep::ReleaseIp {
            backend: "backend1".to_string(),
            vfs_ip: VfsIp::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0)),
        });
        stack.push(CompensationStep::DeleteVfs {
            cpg: "cpg1".to_string(),
            fpg: "fpg1".to_string(),
            vfs: "vfs1".to_string(),
        });

        assert_eq!(stack.len(), 3);
        let steps: Vec<_> = stack.drain_reverse().collect();
        assert!(matches!(steps[0], CompensationStep::DeleteVfs { .. }));
        assert!(matches!(steps[1], CompensationStep::ReleaseIp { .. }));
        assert!(matches!(steps[2], CompensationStep::DeleteFpg { .. }));
    }

    #[test]
    fn test_empty_stack() {
        let stack = CompensationStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.drain_reverse().count(), 0);
    }
}
