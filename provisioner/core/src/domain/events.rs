// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Provisioning domain events
//!
//! Emitted by the saga at each observable state change. Consumed through
//! `crate::infrastructure::event_bus` for log streaming and observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::share::VfsIp;

/// Events emitted over the lifetime of one provisioning saga
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvisioningEvent {
    /// A share record was persisted in CREATING status
    ShareCreating {
        share: String,
        backend: String,
        cpg: String,
        at: DateTime<Utc>,
    },

    /// The backend confirmed the share; the record is AVAILABLE
    ShareAvailable {
        share: String,
        backend: String,
        fpg: String,
        vfs: String,
        vfs_ip: VfsIp,
        at: DateTime<Utc>,
    },

    /// The saga failed; compensation has already run
    ShareCreationFailed {
        share: String,
        backend: String,
        reason: String,
        at: DateTime<Utc>,
    },

    /// A capacity container was created on the backend
    FpgCreated {
        fpg: String,
        cpg: String,
        backend: String,
        default_for_cpg: bool,
        at: DateTime<Utc>,
    },

    /// A legacy FPG was adopted into the metadata store
    LegacyFpgAdopted {
        fpg: String,
        cpg: String,
        backend: String,
        at: DateTime<Utc>,
    },

    /// A virtual file server was bound to an FPG
    VfsCreated {
        vfs: String,
        fpg: String,
        vfs_ip: VfsIp,
        at: DateTime<Utc>,
    },

    /// An address moved from the free pool into the locked set
    IpClaimed {
        backend: String,
        vfs_ip: VfsIp,
        at: DateTime<Utc>,
    },

    /// An address returned to the free pool
    IpReleased {
        backend: String,
        vfs_ip: VfsIp,
        at: DateTime<Utc>,
    },

    /// Reverse-order compensation finished for a failed saga
    CompensationCompleted {
        share: String,
        backend: String,
        steps: usize,
        at: DateTime<Utc>,
    },
}

impl ProvisioningEvent {
    /// The share this event belongs to, when it is share-scoped
    pub fn share_name(&self) -> Option<&str> {
        match self {
            Self::ShareCreating { share, .. }
            | Self::ShareAvailable { share, .. }
            | Self::ShareCreationFailed { share, .. }
            | Self::CompensationCompleted { share, .. } => Some(share),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_share_scoped_events_expose_share_name() {
        let event = ProvisioningEvent::ShareCreating {
            share: "share1".to_string(),
            backend: "backend1".to_string(),
            cpg: "cpg1".to_string(),
            at: Utc::now(),
        };
        assert_eq!(event.share_name(), Some("share1"));

        let event = ProvisioningEvent::IpClaimed {
            backend: "backend1".to_string(),
            vfs_ip: VfsIp::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 255, 255, 0)),
            at: Utc::now(),
        };
        assert_eq!(event.share_name(), None);
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = ProvisioningEvent::ShareCreationFailed {
            share: "share1".to_string(),
            backend: "backend1".to_string(),
            reason: "backend unreachable".to_string(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "share_creation_failed");
        assert_eq!(json["share"], "share1");
    }
}
