use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::models::instance::{instance_name, FleetSnapshot};
use crate::services::fleet::FleetDirectory;
use crate::services::queue::JobChannel;

/// Why a scale-out tick launched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// Instances are still booting; they are assumed to be enough.
    PendingLaunches,
    /// The queue is empty.
    NoDemand,
    /// Running + pending already meets the fleet cap.
    AtCapacity,
    /// Queue depth or fleet membership could not be read.
    ObservationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutDecision {
    Launch(u32),
    Hold(HoldReason),
}

/// Size one launch batch from queue depth and the current fleet.
///
/// Launches `min(max_fleet - (running + pending), depth)` instances, and
/// nothing while any instance is still pending.
pub fn plan(depth: u64, snapshot: &FleetSnapshot, max_fleet: u32) -> ScaleOutDecision {
    if !snapshot.pending.is_empty() {
        return ScaleOutDecision::Hold(HoldReason::PendingLaunches);
    }

    let size = snapshot.size();
    if depth == 0 {
        return ScaleOutDecision::Hold(HoldReason::NoDemand);
    }
    if size >= max_fleet {
        return ScaleOutDecision::Hold(HoldReason::AtCapacity);
    }

    let headroom = max_fleet - size;
    let demand = u32::try_from(depth).unwrap_or(u32::MAX);
    ScaleOutDecision::Launch(headroom.min(demand))
}

/// Periodically grows the fleet to match queued demand.
pub struct ScaleOutController {
    queue: Arc<dyn JobChannel>,
    fleet: FleetDirectory,
    max_fleet: u32,
}

impl ScaleOutController {
    pub fn new(queue: Arc<dyn JobChannel>, fleet: FleetDirectory, max_fleet: u32) -> Self {
        Self {
            queue,
            fleet,
            max_fleet,
        }
    }

    /// Observe, decide and act once.
    pub async fn tick(&self) -> ScaleOutDecision {
        let depth = match self.queue.approximate_depth().await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(error = %e, "scale-out: failed to read queue depth");
                return ScaleOutDecision::Hold(HoldReason::ObservationFailed);
            }
        };
        let snapshot = match self.fleet.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "scale-out: failed to list fleet");
                return ScaleOutDecision::Hold(HoldReason::ObservationFailed);
            }
        };

        metrics::gauge!("fleet_queue_depth").set(depth as f64);
        metrics::gauge!("fleet_running_instances").set(snapshot.running.len() as f64);
        metrics::gauge!("fleet_pending_instances").set(snapshot.pending.len() as f64);

        let decision = plan(depth, &snapshot, self.max_fleet);
        match decision {
            ScaleOutDecision::Launch(count) => self.launch(count, snapshot.size()).await,
            ScaleOutDecision::Hold(reason) => {
                debug!(
                    depth,
                    running = snapshot.running.len(),
                    pending = snapshot.pending.len(),
                    ?reason,
                    "scale-out: holding"
                );
            }
        }
        decision
    }

    async fn launch(&self, count: u32, fleet_size: u32) {
        let ids = match self.fleet.launch(count).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(count, error = %e, "scale-out: launch failed, re-evaluating next tick");
                return;
            }
        };

        metrics::counter!("fleet_instances_launched").increment(ids.len() as u64);
        info!(requested = count, launched = ids.len(), fleet_size, "scale-out: launched instances");

        for (ordinal, id) in (fleet_size + 1..).zip(&ids) {
            let name = instance_name(ordinal);
            if let Err(e) = self.fleet.tag(id, "Name", &name).await {
                warn!(instance_id = %id, name = %name, error = %e, "scale-out: failed to tag instance");
            }
        }
    }

    /// Tick every `period` until `shutdown` fires.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = period.as_secs(), max_fleet = self.max_fleet, "scale-out controller started");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("scale-out controller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instance::InstanceId;

    fn fleet(running: usize, pending: usize) -> FleetSnapshot {
        FleetSnapshot {
            running: (0..running).map(|i| InstanceId(format!("i-r{i}"))).collect(),
            pending: (0..pending).map(|i| InstanceId(format!("i-p{i}"))).collect(),
        }
    }

    #[test]
    fn pending_instances_block_launches() {
        for depth in [0, 1, 50, 10_000] {
            assert_eq!(
                plan(depth, &fleet(2, 1), 20),
                ScaleOutDecision::Hold(HoldReason::PendingLaunches)
            );
        }
    }

    #[test]
    fn empty_queue_launches_nothing() {
        assert_eq!(plan(0, &fleet(0, 0), 20), ScaleOutDecision::Hold(HoldReason::NoDemand));
    }

    #[test]
    fn full_fleet_launches_nothing() {
        assert_eq!(plan(100, &fleet(20, 0), 20), ScaleOutDecision::Hold(HoldReason::AtCapacity));
        assert_eq!(plan(100, &fleet(25, 0), 20), ScaleOutDecision::Hold(HoldReason::AtCapacity));
    }

    #[test]
    fn launch_is_bounded_by_demand() {
        assert_eq!(plan(3, &fleet(5, 0), 20), ScaleOutDecision::Launch(3));
    }

    #[test]
    fn launch_is_bounded_by_headroom() {
        assert_eq!(plan(100, &fleet(15, 0), 20), ScaleOutDecision::Launch(5));
        assert_eq!(plan(u64::MAX, &fleet(0, 0), 20), ScaleOutDecision::Launch(20));
    }

    #[test]
    fn launch_never_exceeds_either_bound() {
        for running in 0..=22 {
            for depth in 0..=25u64 {
                let snapshot = fleet(running, 0);
                if let ScaleOutDecision::Launch(n) = plan(depth, &snapshot, 20) {
                    assert!(n >= 1);
                    assert!(n <= 20 - snapshot.size());
                    assert!(u64::from(n) <= depth);
                }
            }
        }
    }
}
