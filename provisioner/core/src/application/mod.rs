// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod compensation;
pub mod error;
pub mod fpg_lifecycle;
pub mod ip_claim;
pub mod share_provisioner;
pub mod vfs_lifecycle;

// Re-export the public surface for convenience
pub use error::ProvisionError;
pub use share_provisioner::{
    ShareProvisioningService, ShareRequest, StandardShareProvisioningService,
};
