use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::control::window::MovingAverageWindow;
use crate::models::instance::InstanceState;
use crate::services::fleet::FleetDirectory;
use crate::services::queue::JobChannel;

/// Number of samples averaged before any scale-in decision.
pub const WINDOW_SIZE: usize = 3;

/// Classification of one queue-depth sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// The window has not filled yet.
    Warming,
    /// The windowed average is non-zero.
    Busy { average: f64 },
    /// Every sample in the window is zero.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleInDecision {
    Warming,
    Busy,
    /// Idle at the floor, but not for long enough yet.
    GracePeriod { streak: u32 },
    Terminate,
    /// Idle with fewer running instances than the floor; nothing to retire.
    BelowFloor,
    ObservationFailed,
}

/// Scale-in hysteresis state.
///
/// The window always slides; the zero streak resets on any busy window,
/// any idle tick above the floor, and after each terminate decision.
#[derive(Debug, Clone)]
pub struct ScaleInPolicy {
    window: MovingAverageWindow,
    zero_streak: u32,
    min_instances: u32,
    idle_ticks_at_floor: u32,
}

impl ScaleInPolicy {
    pub fn new(min_instances: u32, idle_ticks_at_floor: u32) -> Self {
        Self {
            window: MovingAverageWindow::new(WINDOW_SIZE),
            zero_streak: 0,
            min_instances,
            idle_ticks_at_floor: idle_ticks_at_floor.max(1),
        }
    }

    pub fn zero_streak(&self) -> u32 {
        self.zero_streak
    }

    /// Slide the window forward by one sample.
    pub fn record(&mut self, depth: u64) -> Sample {
        self.window.push(depth);
        match self.window.average() {
            None => Sample::Warming,
            Some(_) if self.window.is_idle() => Sample::Idle,
            Some(average) => {
                self.zero_streak = 0;
                Sample::Busy { average }
            }
        }
    }

    /// Decide what to do after an idle sample given the running count.
    pub fn decide_idle(&mut self, running: u32) -> ScaleInDecision {
        if running == self.min_instances {
            self.zero_streak += 1;
            if self.zero_streak >= self.idle_ticks_at_floor {
                self.zero_streak = 0;
                ScaleInDecision::Terminate
            } else {
                ScaleInDecision::GracePeriod {
                    streak: self.zero_streak,
                }
            }
        } else if running > self.min_instances {
            self.zero_streak = 0;
            ScaleInDecision::Terminate
        } else {
            self.zero_streak = 0;
            ScaleInDecision::BelowFloor
        }
    }
}

/// Periodically retires idle workers, one per tick.
pub struct ScaleInController {
    queue: Arc<dyn JobChannel>,
    fleet: FleetDirectory,
    policy: ScaleInPolicy,
}

impl ScaleInController {
    pub fn new(queue: Arc<dyn JobChannel>, fleet: FleetDirectory, policy: ScaleInPolicy) -> Self {
        Self { queue, fleet, policy }
    }

    pub fn policy(&self) -> &ScaleInPolicy {
        &self.policy
    }

    /// Sample, decide and act once.
    pub async fn tick(&mut self) -> ScaleInDecision {
        let depth = match self.queue.approximate_depth().await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(error = %e, "scale-in: failed to read queue depth");
                return ScaleInDecision::ObservationFailed;
            }
        };
        metrics::gauge!("fleet_queue_depth").set(depth as f64);

        match self.policy.record(depth) {
            Sample::Warming => {
                debug!(depth, "scale-in: window filling");
                return ScaleInDecision::Warming;
            }
            Sample::Busy { average } => {
                debug!(depth, average, "scale-in: queue busy");
                return ScaleInDecision::Busy;
            }
            Sample::Idle => {}
        }

        let running = match self.fleet.ids_in_state(InstanceState::Running).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "scale-in: failed to list running instances");
                return ScaleInDecision::ObservationFailed;
            }
        };

        let decision = self.policy.decide_idle(running.len() as u32);
        match decision {
            ScaleInDecision::Terminate => {
                // Workers are interchangeable; any running instance will do.
                if let Some(victim) = running.first() {
                    match self.fleet.terminate(victim).await {
                        Ok(()) => {
                            metrics::counter!("fleet_instances_terminated").increment(1);
                            info!(instance_id = %victim, running = running.len(), "scale-in: terminated instance");
                        }
                        Err(e) => {
                            warn!(instance_id = %victim, error = %e, "scale-in: terminate failed");
                        }
                    }
                }
            }
            ScaleInDecision::GracePeriod { streak } => {
                debug!(streak, running = running.len(), "scale-in: idle at floor, waiting");
            }
            _ => {}
        }
        decision
    }

    /// Tick every `period` until `shutdown` fires.
    pub async fn run(&mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_secs = period.as_secs(),
            min_instances = self.policy.min_instances,
            "scale-in controller started"
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("scale-in controller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_window_resets_streak() {
        let mut policy = ScaleInPolicy::new(1, 3);
        for depth in [0, 0, 0] {
            policy.record(depth);
        }
        assert_eq!(policy.decide_idle(1), ScaleInDecision::GracePeriod { streak: 1 });
        assert!(matches!(policy.record(4), Sample::Busy { .. }));
        assert_eq!(policy.zero_streak(), 0);
    }

    #[test]
    fn mixed_window_is_busy() {
        let mut policy = ScaleInPolicy::new(1, 3);
        assert_eq!(policy.record(5), Sample::Warming);
        assert_eq!(policy.record(5), Sample::Warming);
        match policy.record(0) {
            Sample::Busy { average } => assert!((average - 10.0 / 3.0).abs() < 1e-9),
            other => panic!("expected busy window, got {other:?}"),
        }
    }

    #[test]
    fn floor_requires_consecutive_idle_ticks() {
        let mut policy = ScaleInPolicy::new(1, 3);
        policy.record(0);
        policy.record(0);
        assert_eq!(policy.record(0), Sample::Idle);
        assert_eq!(policy.decide_idle(1), ScaleInDecision::GracePeriod { streak: 1 });
        assert_eq!(policy.record(0), Sample::Idle);
        assert_eq!(policy.decide_idle(1), ScaleInDecision::GracePeriod { streak: 2 });
        assert_eq!(policy.record(0), Sample::Idle);
        assert_eq!(policy.decide_idle(1), ScaleInDecision::Terminate);
        assert_eq!(policy.zero_streak(), 0);
    }

    #[test]
    fn above_floor_terminates_immediately() {
        let mut policy = ScaleInPolicy::new(1, 3);
        for depth in [0, 0, 0] {
            policy.record(depth);
        }
        assert_eq!(policy.decide_idle(3), ScaleInDecision::Terminate);
        assert_eq!(policy.zero_streak(), 0);
    }

    #[test]
    fn leaving_the_floor_resets_streak() {
        let mut policy = ScaleInPolicy::new(1, 3);
        for depth in [0, 0, 0] {
            policy.record(depth);
        }
        policy.decide_idle(1);
        policy.decide_idle(1);
        assert_eq!(policy.decide_idle(2), ScaleInDecision::Terminate);
        assert_eq!(policy.decide_idle(1), ScaleInDecision::GracePeriod { streak: 1 });
    }

    #[test]
    fn empty_fleet_is_below_floor() {
        let mut policy = ScaleInPolicy::new(1, 3);
        assert_eq!(policy.decide_idle(0), ScaleInDecision::BelowFloor);
        assert_eq!(policy.zero_streak(), 0);
    }
}
