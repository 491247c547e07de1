use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::instance::InstanceState;
use crate::services::queue::JobChannel;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub queue: QueueHealth,
    pub fleet: FleetHealth,
}

#[derive(Serialize)]
pub struct QueueHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    pub depth: Option<u64>,
    pub in_flight: Option<u64>,
}

#[derive(Serialize)]
pub struct FleetHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    pub running: Option<usize>,
}

/// GET /health — queue and fleet API reachability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Check Redis connectivity
    let queue_start = std::time::Instant::now();
    let queue_check = match state.queue.health_check().await {
        Ok(()) => QueueHealth {
            status: "ok".to_string(),
            latency_ms: Some(queue_start.elapsed().as_millis() as u64),
            depth: state.queue.approximate_depth().await.ok(),
            in_flight: state.queue.in_flight().await.ok(),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Queue health check failed");
            QueueHealth {
                status: "error".to_string(),
                latency_ms: None,
                depth: None,
                in_flight: None,
            }
        }
    };

    // Check fleet API connectivity
    let fleet_start = std::time::Instant::now();
    let fleet_check = match state.fleet.ids_in_state(InstanceState::Running).await {
        Ok(ids) => FleetHealth {
            status: "ok".to_string(),
            latency_ms: Some(fleet_start.elapsed().as_millis() as u64),
            running: Some(ids.len()),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Fleet API health check failed");
            FleetHealth {
                status: "error".to_string(),
                latency_ms: None,
                running: None,
            }
        }
    };

    let all_healthy = queue_check.status == "ok" && fleet_check.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            queue: queue_check,
            fleet: fleet_check,
        },
    };

    (status_code, Json(response))
}
