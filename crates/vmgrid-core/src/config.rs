//! Cluster configuration parser.
//!
//! Every process that touches cluster state carries one of these. Node
//! identity lives here rather than in any global so that tests can run
//! several "nodes" against one store in the same process.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Name of the node this process runs on.
    pub node_name: String,
    /// Mesh address of this node.
    pub node_ip: String,
    /// Mesh address of the node that hosts network services.
    pub network_node_ip: String,
    /// Heartbeat record lifetime, in seconds.
    pub node_ttl: u64,
    /// Default lock lease, in seconds.
    pub lock_ttl: u64,
    /// Default time to wait for a contended lock, in seconds.
    pub lock_timeout: u64,
    /// Lifetime of a node's metrics blob, in seconds.
    pub metrics_ttl: u64,
    /// Grace period before a deleted or errored object is hard deleted.
    pub cleaner_delay: u64,
    /// Window during which a stale power report cannot undo a transition.
    pub power_state_debounce: u64,
    pub console_port_low: u16,
    pub console_port_high: u16,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".to_string(),
            node_ip: "127.0.0.1".to_string(),
            network_node_ip: "127.0.0.1".to_string(),
            node_ttl: 120,
            lock_ttl: 60,
            lock_timeout: 10,
            metrics_ttl: 120,
            cleaner_delay: 3600,
            power_state_debounce: 70,
            console_port_low: 30000,
            console_port_high: 50000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("console port range {low}..{high} is empty")]
    EmptyPortRange { low: u16, high: u16 },

    #[error("node_name must not be empty")]
    MissingNodeName,
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClusterConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Config for a named node with every other setting at its default.
    pub fn for_node(node_name: &str, node_ip: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            node_ip: node_ip.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.is_empty() {
            return Err(ConfigError::MissingNodeName);
        }
        if self.console_port_low >= self.console_port_high {
            return Err(ConfigError::EmptyPortRange {
                low: self.console_port_low,
                high: self.console_port_high,
            });
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }

    pub fn console_ports(&self) -> Range<u16> {
        self.console_port_low..self.console_port_high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partial_uses_defaults() {
        let toml_str = r#"
node_name = "sf-1"
node_ip = "10.0.0.1"
cleaner_delay = 60
"#;
        let config: ClusterConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node_name, "sf-1");
        assert_eq!(config.cleaner_delay, 60);
        assert_eq!(config.metrics_ttl, 120);
        assert_eq!(config.power_state_debounce, 70);
    }

    #[test]
    fn from_file_validates_port_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmgrid.toml");
        std::fs::write(&path, "console_port_low = 500\nconsole_port_high = 400\n").unwrap();

        let err = ClusterConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn for_node_overrides_identity_only() {
        let config = ClusterConfig::for_node("sf-2", "10.0.0.2");
        assert_eq!(config.node_name, "sf-2");
        assert_eq!(config.node_ip, "10.0.0.2");
        assert_eq!(config.lock_ttl(), Duration::from_secs(60));
        assert_eq!(config.console_ports(), 30000..50000);
    }
}
