use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use classifier_fleet::{
    app_state::AppState,
    config::{ControlConfig, FleetConfig, QueueConfig},
    control::{ScaleInController, ScaleInPolicy, ScaleOutController},
    routes,
    services::{
        fleet::{FleetDirectory, HttpFleetApi, LaunchTemplate},
        queue::{JobChannel, RedisChannel},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let queue_config = QueueConfig::from_env().expect("Failed to load queue configuration");
    let fleet_config = FleetConfig::from_env().expect("Failed to load fleet configuration");
    let control = ControlConfig::from_env().expect("Failed to load control configuration");

    tracing::info!(
        image_id = %fleet_config.image_id,
        max_fleet = control.max_fleet,
        min_instances = control.min_instances,
        tick_secs = control.tick_secs,
        "Initializing fleet controller"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe_metrics();

    // Initialize Redis request queue
    tracing::info!("Connecting to Redis request queue");
    let queue = Arc::new(
        RedisChannel::new(
            &queue_config.redis_url,
            &queue_config.request_queue,
            queue_config.visibility_timeout(),
        )
        .expect("Failed to initialize request queue"),
    );

    // Initialize fleet API client
    tracing::info!("Initializing fleet API client");
    let fleet = FleetDirectory::new(
        Arc::new(HttpFleetApi::new(
            fleet_config.api_url.clone(),
            fleet_config.api_token.clone(),
        )),
        LaunchTemplate {
            image_id: fleet_config.image_id,
            instance_type: fleet_config.instance_type,
            security_group_id: fleet_config.security_group_id,
            user_data: fleet_config.user_data,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let period = control.tick_period();
    let requests: Arc<dyn JobChannel> = queue.clone();

    let scale_out = ScaleOutController::new(requests.clone(), fleet.clone(), control.max_fleet);
    let scale_out_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { scale_out.run(period, shutdown).await }
    });

    let mut scale_in = ScaleInController::new(
        requests,
        fleet.clone(),
        ScaleInPolicy::new(control.min_instances, control.idle_ticks_at_floor),
    );
    let scale_in_task = tokio::spawn(async move { scale_in.run(period, shutdown_rx).await });

    // Ops endpoints
    let state = AppState::new(queue, fleet, prometheus_handle);
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::prometheus_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&control.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Ops server listening on {}", control.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(scale_out_task, scale_in_task);
    tracing::info!("Fleet controller stopped");
}
