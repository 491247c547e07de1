use classifier_fleet::{
    config::{ClassifierConfig, QueueConfig, StorageConfig, WorkerConfig},
    routes,
    services::{
        classifier::WorkersAiClassifier,
        queue::RedisChannel,
        storage::S3Store,
    },
    worker::{Worker, WorkerClients, WorkerSettings},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting classification worker");

    // Load configuration
    let queue_config = QueueConfig::from_env().expect("Failed to load queue configuration");
    let storage_config = StorageConfig::from_env().expect("Failed to load storage configuration");
    let classifier_config =
        ClassifierConfig::from_env().expect("Failed to load classifier configuration");
    let worker_config = WorkerConfig::from_env().expect("Failed to load worker configuration");

    if queue_config.visibility_timeout() <= worker_config.sla_deadline() {
        tracing::warn!(
            visibility_timeout_secs = queue_config.visibility_timeout_secs,
            sla_deadline_ms = worker_config.sla_deadline_ms,
            "Visibility timeout does not exceed the SLA deadline; jobs may be redelivered while still in progress"
        );
    }

    // Expose worker metrics for scraping
    let metrics_addr: SocketAddr = worker_config
        .metrics_addr
        .parse()
        .expect("Invalid metrics listener address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    routes::metrics::describe_metrics();

    // Initialize services
    tracing::info!("Initializing services");
    let requests = RedisChannel::new(
        &queue_config.redis_url,
        &queue_config.request_queue,
        queue_config.visibility_timeout(),
    )
    .expect("Failed to initialize request queue");

    let responses = RedisChannel::new(
        &queue_config.redis_url,
        &queue_config.response_queue,
        queue_config.visibility_timeout(),
    )
    .expect("Failed to initialize response queue");

    let inputs = S3Store::new(
        &storage_config.input_bucket,
        &storage_config.region,
        &storage_config.endpoint,
        &storage_config.access_key,
        &storage_config.secret_key,
    )
    .expect("Failed to initialize input bucket client");

    let results = S3Store::new(
        &storage_config.results_bucket,
        &storage_config.region,
        &storage_config.endpoint,
        &storage_config.access_key,
        &storage_config.secret_key,
    )
    .expect("Failed to initialize results bucket client");

    let classifier = WorkersAiClassifier::new(
        classifier_config.api_base,
        classifier_config.account_id,
        classifier_config.api_token,
    );

    let worker = Worker::new(
        WorkerClients {
            requests: Arc::new(requests),
            responses: Arc::new(responses),
            inputs: Arc::new(inputs),
            results: Arc::new(results),
            classifier: Arc::new(classifier),
        },
        WorkerSettings::from(&worker_config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing current batch");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!("Worker ready, starting job processing loop");
    worker.run(shutdown_rx).await;
}
