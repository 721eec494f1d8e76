//! Node liveness registry.
//!
//! A node proves it is alive by rewriting its record before the TTL runs
//! out. A missing record means the node is down.

use std::time::Duration;

use tracing::debug;

use crate::db::ClusterDb;
use crate::error::StateResult;
use crate::types::Node;

const NODE: &str = "node";

impl ClusterDb {
    /// Heartbeat for this node.
    pub fn see_this_node(&self) -> StateResult<Node> {
        let node = Node {
            fqdn: self.config().node_name.clone(),
            ip: self.config().node_ip.clone(),
            lastseen: self.now(),
            version: vmgrid_core::VERSION.to_string(),
        };
        self.write(
            NODE,
            None,
            &node.fqdn,
            &node,
            Some(Duration::from_secs(self.config().node_ttl)),
        )?;
        debug!(node = %node.fqdn, ip = %node.ip, "node heartbeat recorded");
        Ok(node)
    }

    pub fn get_node(&self, fqdn: &str) -> StateResult<Option<Node>> {
        self.read(NODE, None, fqdn)
    }

    /// Every node whose heartbeat has not lapsed.
    pub fn get_nodes(&self) -> StateResult<Vec<Node>> {
        self.read_all(NODE, None)
    }

    pub fn get_node_ips(&self) -> StateResult<Vec<String>> {
        Ok(self.get_nodes()?.into_iter().map(|n| n.ip).collect())
    }

    /// The live node configured as the network node, if it is up.
    pub fn get_network_node(&self) -> StateResult<Option<Node>> {
        let wanted = &self.config().network_node_ip;
        Ok(self.get_nodes()?.into_iter().find(|n| &n.ip == wanted))
    }
}
