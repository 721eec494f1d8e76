//! Per-node metrics blobs.
//!
//! Each report replaces the node's whole blob and restarts its TTL. A node
//! that stops reporting drops out of [`ClusterDb::get_all_metrics`] rather
//! than showing stale or zeroed numbers.

use std::time::Duration;

use tracing::debug;

use crate::db::ClusterDb;
use crate::error::StateResult;
use crate::types::{Metrics, MetricsRecord};

const METRICS: &str = "metrics";

impl ClusterDb {
    pub fn update_metrics_bulk(&self, metrics: Metrics) -> StateResult<()> {
        let record = MetricsRecord {
            fqdn: self.node_name().to_string(),
            timestamp: self.now(),
            metrics,
        };
        self.write(
            METRICS,
            None,
            &record.fqdn,
            &record,
            Some(Duration::from_secs(self.config().metrics_ttl)),
        )?;
        debug!(node = %record.fqdn, count = record.metrics.len(), "metrics updated");
        Ok(())
    }

    pub fn get_metrics(&self, fqdn: &str) -> StateResult<Option<MetricsRecord>> {
        self.read(METRICS, None, fqdn)
    }

    /// Metrics of every node that has reported within the TTL.
    pub fn get_all_metrics(&self) -> StateResult<Vec<MetricsRecord>> {
        self.read_all(METRICS, None)
    }
}
