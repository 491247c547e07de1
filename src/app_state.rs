use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::{fleet::FleetDirectory, queue::RedisChannel};

/// Shared state for the controller's ops endpoints.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<RedisChannel>,
    pub fleet: FleetDirectory,
    pub metrics: Arc<PrometheusHandle>,
}

impl AppState {
    pub fn new(queue: Arc<RedisChannel>, fleet: FleetDirectory, metrics: PrometheusHandle) -> Self {
        Self {
            queue,
            fleet,
            metrics: Arc::new(metrics),
        }
    }
}
