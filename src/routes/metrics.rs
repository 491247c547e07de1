use axum::extract::State;
use axum::response::IntoResponse;

use crate::app_state::AppState;

/// Register descriptions for every metric the worker and controllers emit.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "classification_jobs_completed",
        "Jobs published and acknowledged"
    );
    metrics::describe_counter!(
        "classification_jobs_dropped",
        "Jobs abandoned without acknowledgment, by reason"
    );
    metrics::describe_counter!(
        "classification_jobs_unacknowledged",
        "Jobs published whose acknowledgment failed"
    );
    metrics::describe_histogram!(
        "classification_processing_seconds",
        "Time from pickup to acknowledgment of a job"
    );
    metrics::describe_gauge!("fleet_queue_depth", "Approximate request queue depth");
    metrics::describe_gauge!("fleet_running_instances", "Running fleet members");
    metrics::describe_gauge!("fleet_pending_instances", "Fleet members still booting");
    metrics::describe_counter!("fleet_instances_launched", "Instances launched by scale-out");
    metrics::describe_counter!("fleet_instances_terminated", "Instances retired by scale-in");
}

/// GET /metrics — Prometheus text exposition format.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
