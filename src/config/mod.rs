//! Environment-driven configuration.
//!
//! Each section is read from its own variable prefix (`QUEUE_REDIS_URL`,
//! `FLEET_IMAGE_ID`, ...) so the worker and the controller only need the
//! variables they actually use.

use serde::Deserialize;
use std::time::Duration;

/// Request/response queues backed by Redis.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Redis connection string
    pub redis_url: String,

    /// Queue the web tier publishes classification requests to
    pub request_queue: String,

    /// Queue completed jobs are published to
    pub response_queue: String,

    /// Seconds a received job stays invisible before it is redelivered
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

/// S3-compatible object storage holding input images and results.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Endpoint URL (S3, R2, MinIO, ...)
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    pub access_key: String,

    pub secret_key: String,

    /// Bucket the web tier stages uploaded images in
    pub input_bucket: String,

    /// Bucket classification results are written to
    pub results_bucket: String,
}

/// Cloudflare Workers AI credentials for the image classifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub account_id: String,

    pub api_token: String,

    #[serde(default = "default_classifier_api_base")]
    pub api_base: String,
}

/// Compute fleet API and the launch template for new workers.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Base URL of the fleet API
    pub api_url: String,

    pub api_token: String,

    /// Machine image workers boot from. Also selects fleet members.
    pub image_id: String,

    pub instance_type: String,

    pub security_group_id: String,

    /// Bootstrap script passed to new instances
    #[serde(default = "default_user_data")]
    pub user_data: String,
}

/// Worker loop tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum jobs taken per receive call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause after an empty receive
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Jobs older than this when classification finishes are abandoned
    #[serde(default = "default_sla_deadline_ms")]
    pub sla_deadline_ms: u64,

    /// Prometheus scrape listener (e.g., "0.0.0.0:9100")
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

/// Autoscaling controller tuning and the ops listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_max_fleet")]
    pub max_fleet: u32,

    #[serde(default = "default_min_instances")]
    pub min_instances: u32,

    /// Seconds between controller ticks
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Consecutive idle ticks required before retiring the last instances
    #[serde(default = "default_idle_ticks_at_floor")]
    pub idle_ticks_at_floor: u32,

    /// Ops server bind address (e.g., "0.0.0.0:9090")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_visibility_timeout_secs() -> u64 {
    60
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_classifier_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_user_data() -> String {
    "#!/bin/bash\nrunuser -l worker -c 'cd /opt/classifier && nohup ./worker &'\n".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_idle_sleep_ms() -> u64 {
    100
}

fn default_sla_deadline_ms() -> u64 {
    30_000
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_max_fleet() -> u32 {
    20
}

fn default_min_instances() -> u32 {
    1
}

fn default_tick_secs() -> u64 {
    30
}

fn default_idle_ticks_at_floor() -> u32 {
    3
}

fn default_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        load("QUEUE_")
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        load("STORAGE_")
    }
}

impl ClassifierConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        load("CLASSIFIER_")
    }
}

impl FleetConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        load("FLEET_")
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        load("WORKER_")
    }

    pub fn sla_deadline(&self) -> Duration {
        Duration::from_millis(self.sla_deadline_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

impl ControlConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        load("CONTROL_")
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

fn load<T: serde::de::DeserializeOwned>(prefix: &str) -> Result<T, envy::Error> {
    dotenvy::dotenv().ok();
    envy::prefixed(prefix).from_env()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults_apply() {
        let config: WorkerConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.idle_sleep(), Duration::from_millis(100));
        assert_eq!(config.sla_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn control_defaults_apply() {
        let config: ControlConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.max_fleet, 20);
        assert_eq!(config.min_instances, 1);
        assert_eq!(config.tick_period(), Duration::from_secs(30));
        assert_eq!(config.idle_ticks_at_floor, 3);
    }

    #[test]
    fn queue_config_reads_required_fields() {
        let vars = vec![
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
            ("REQUEST_QUEUE".to_string(), "classify:requests".to_string()),
            ("RESPONSE_QUEUE".to_string(), "classify:responses".to_string()),
        ];
        let config: QueueConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.request_queue, "classify:requests");
        assert_eq!(config.visibility_timeout(), Duration::from_secs(60));
    }
}
