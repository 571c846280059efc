// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Provisioner Configuration Types
//
// Defines the configuration schema for the share provisioner, including:
// - Per-backend IP address pools (subnets with free addresses)
// - The share-count quota applied to every FPG
// - The ownership prefix identifying FPGs this system created
// - Named-lock acquisition timeout

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Top-level provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Maximum number of shares an FPG may carry
    #[serde(default = "default_max_shares_per_fpg")]
    pub max_shares_per_fpg: u32,

    /// Name prefix marking FPGs created by this system. The default-FPG
    /// fallback scan only considers FPGs carrying this prefix; ownership of
    /// auto-created FPGs is a declared convention, not incidental string
    /// matching.
    #[serde(default = "default_fpg_name_prefix")]
    pub fpg_name_prefix: String,

    /// Timeout for acquiring a named `(backend, fpg)` lock, in seconds
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Capacity of auto-created FPGs, in GiB
    #[serde(default = "default_fpg_size_gib")]
    pub default_fpg_size_gib: u64,

    /// Per-backend settings, keyed by backend identifier
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

/// Per-backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Subnets whose addresses the backend's VFSes may claim
    pub subnets: Vec<SubnetConfig>,
}

/// One subnet's worth of claimable addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// Netmask shared by every address in this subnet
    pub netmask: Ipv4Addr,

    /// Addresses available for VFS creation
    pub addresses: Vec<Ipv4Addr>,
}

fn default_max_shares_per_fpg() -> u32 {
    16
}

fn default_fpg_name_prefix() -> String {
    "Docker".to_string()
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_fpg_size_gib() -> u64 {
    1024
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            max_shares_per_fpg: default_max_shares_per_fpg(),
            fpg_name_prefix: default_fpg_name_prefix(),
            lock_timeout_secs: default_lock_timeout_secs(),
            default_fpg_size_gib: default_fpg_size_gib(),
            backends: HashMap::new(),
        }
    }
}

impl ProvisionerConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e.to_string()))?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants the schema cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_shares_per_fpg == 0 {
            return Err(ConfigError::Invalid(
                "max_shares_per_fpg must be greater than zero".to_string(),
            ));
        }
        if self.fpg_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "fpg_name_prefix cannot be empty".to_string(),
            ));
        }
        for (backend, backend_config) in &self.backends {
            if backend_config.subnets.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "backend {} declares no subnets",
                    backend
                )));
            }
            let mut seen = HashSet::new();
            for subnet in &backend_config.subnets {
                if subnet.addresses.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "backend {} declares subnet {} with no addresses",
                        backend, subnet.netmask
                    )));
                }
                for address in &subnet.addresses {
                    if !seen.insert(*address) {
                        return Err(ConfigError::Invalid(format!(
                            "backend {} declares address {} more than once",
                            backend, address
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Settings for one backend
    pub fn backend(&self, backend: &str) -> Option<&BackendConfig> {
        self.backends.get(backend)
    }

    /// Whether an FPG name marks a container this system created
    pub fn owns_fpg(&self, fpg_name: &str) -> bool {
        fpg_name.starts_with(&self.fpg_name_prefix)
    }

    /// Lock acquisition timeout as a `Duration`
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Generate a name for an auto-created FPG. Carries the ownership prefix
    /// so the fallback scan will consider it.
    pub fn generate_fpg_name(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}Fpg_{}", self.fpg_name_prefix, &suffix[..8])
    }

    /// Conventional VFS name for an FPG (one VFS per FPG)
    pub fn vfs_name_for(fpg_name: &str) -> String {
        format!("{}_vfs", fpg_name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
max_shares_per_fpg: 8
fpg_name_prefix: "Docker"
lock_timeout_secs: 5
backends:
  backend1:
    subnets:
      - netmask: 255.255.255.0
        addresses: [10.0.0.5, 10.0.0.6]
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: ProvisionerConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.max_shares_per_fpg, 8);
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        // Unset field falls back to its default
        assert_eq!(config.default_fpg_size_gib, 1024);

        let backend = config.backend("backend1").unwrap();
        assert_eq!(backend.subnets.len(), 1);
        assert_eq!(backend.subnets[0].addresses.len(), 2);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ProvisionerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.max_shares_per_fpg, 8);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            ProvisionerConfig::from_yaml_file("/nonexistent/provisioner.yaml"),
            Err(ConfigError::Io(_, _))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_quota() {
        let mut config = ProvisionerConfig::default();
        config.max_shares_per_fpg = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_addresses() {
        let config: ProvisionerConfig = serde_yaml::from_str(
            r#"
backends:
  backend1:
    subnets:
      - netmask: 255.255.255.0
        addresses: [10.0.0.5]
      - netmask: 255.255.0.0
        addresses: [10.0.0.5]
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_subnet() {
        let config: ProvisionerConfig = serde_yaml::from_str(
            r#"
backends:
  backend1:
    subnets:
      - netmask: 255.255.255.0
        addresses: []
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ownership_predicate_and_generated_names() {
        let config = ProvisionerConfig::default();
        assert!(config.owns_fpg("DockerFpg_ab12cd34"));
        assert!(!config.owns_fpg("HandMadeFpg"));

        let generated = config.generate_fpg_name();
        assert!(config.owns_fpg(&generated));

        let other = config.generate_fpg_name();
        assert_ne!(generated, other);

        assert_eq!(
            ProvisionerConfig::vfs_name_for("DockerFpg_ab12cd34"),
            "DockerFpg_ab12cd34_vfs"
        );
    }
}
