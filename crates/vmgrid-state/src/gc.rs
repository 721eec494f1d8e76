//! Garbage collection of terminal objects.
//!
//! The stale scans are pure filters over one listing: they yield objects in
//! `deleted` or `error` whose last transition is older than `delay`, and
//! touch nothing. [`Reaper`] drives them, hard-deleting what they yield.
//! Every hard delete is idempotent, so a sweep interrupted half way is
//! finished by the next one.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::db::ClusterDb;
use crate::error::StateResult;
use crate::types::{Instance, LifecycleState, Network, NetworkInterface, Tracked};

impl ClusterDb {
    pub fn get_stale_instances(&self, delay: Duration) -> StateResult<impl Iterator<Item = Instance>> {
        self.stale::<Instance>(delay)
    }

    pub fn get_stale_networks(&self, delay: Duration) -> StateResult<impl Iterator<Item = Network>> {
        self.stale::<Network>(delay)
    }

    pub fn get_stale_network_interfaces(
        &self,
        delay: Duration,
    ) -> StateResult<impl Iterator<Item = NetworkInterface>> {
        self.stale::<NetworkInterface>(delay)
    }

    fn stale<T>(&self, delay: Duration) -> StateResult<impl Iterator<Item = T>>
    where
        T: Tracked + DeserializeOwned,
    {
        let cutoff = self.now() - delay.as_secs_f64();
        Ok(self
            .read_all::<T>(T::OBJECT_TYPE, None)?
            .into_iter()
            .filter(move |object| object.state().is_terminal() && object.state_updated() < cutoff))
    }
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub instances: usize,
    pub interfaces: usize,
    pub networks: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.instances + self.interfaces + self.networks
    }
}

/// Periodically hard-deletes stale objects.
#[derive(Clone)]
pub struct Reaper {
    db: ClusterDb,
    delay: Duration,
    interval: Duration,
}

impl Reaper {
    /// A reaper using the configured `cleaner_delay` and a one minute interval.
    pub fn new(db: ClusterDb) -> Self {
        let delay = Duration::from_secs(db.config().cleaner_delay);
        Self {
            db,
            delay,
            interval: Duration::from_secs(60),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass: instances, then interfaces, then networks.
    ///
    /// A failure on one object is logged and skipped so it cannot wedge the
    /// rest of the sweep; listing failures abort it.
    pub fn sweep_once(&self) -> StateResult<SweepReport> {
        let mut report = SweepReport::default();

        for instance in self.db.get_stale_instances(self.delay)? {
            match self.db.hard_delete_instance(&instance.uuid) {
                Ok(()) => report.instances += 1,
                Err(e) => warn!(uuid = %instance.uuid, error = %e, "failed to reap instance"),
            }
        }
        for interface in self.db.get_stale_network_interfaces(self.delay)? {
            match self.db.hard_delete_network_interface(&interface.uuid) {
                Ok(()) => report.interfaces += 1,
                Err(e) => warn!(uuid = %interface.uuid, error = %e, "failed to reap interface"),
            }
        }
        for network in self.db.get_stale_networks(self.delay)? {
            match self.db.hard_delete_network(&network.uuid) {
                Ok(()) => report.networks += 1,
                Err(e) => warn!(uuid = %network.uuid, error = %e, "failed to reap network"),
            }
        }

        if report.total() > 0 {
            info!(
                instances = report.instances,
                interfaces = report.interfaces,
                networks = report.networks,
                "gc sweep removed stale objects"
            );
        } else {
            debug!("gc sweep found nothing to remove");
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            delay_secs = self.delay.as_secs(),
            interval_secs = self.interval.as_secs(),
            "reaper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let reaper = self.clone();
                    match tokio::task::spawn_blocking(move || reaper.sweep_once()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "gc sweep failed"),
                        Err(e) => warn!(error = %e, "gc sweep task panicked"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("reaper shutting down");
                    break;
                }
            }
        }
    }
}
