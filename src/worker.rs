//! Worker loop: pulls jobs off the request channel and drives each one
//! through fetch → stage → classify → publish → acknowledge.
//! A body that does not parse as a job envelope is skipped at the
//! `Received` stage before any fetch is attempted.
//!
//! A delivery is acknowledged only after its result has been written to the
//! results bucket and the updated envelope sent on the response channel.
//! Every failure before that point leaves the delivery unacknowledged so the
//! channel's visibility timeout hands it to another worker.

use std::sync::Arc;
use std::time::Duration;

use strum::{Display, IntoStaticStr};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::config::WorkerConfig;
use crate::models::job::{Delivery, Job, ResultRecord};
use crate::services::classifier::Classifier;
use crate::services::queue::{JobChannel, QueueError, ResponseChannel};
use crate::services::storage::ObjectStore;

/// Processing stage a job last reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Delivered, but the envelope has not been read yet.
    Received,
    Fetched,
    Staged,
    Classified,
}

/// Why a job was abandoned without acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    Malformed,
    FetchFailed,
    NotAnImage,
    ClassifyFailed,
    DeadlineExceeded { age_ms: i64 },
    PublishFailed,
}

/// Terminal state of one delivery on this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Published and acknowledged.
    Done,
    /// Published, but the acknowledgment call failed; expect a redelivery.
    Unacknowledged,
    Dropped { stage: Stage, reason: DropReason },
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub idle_sleep: Duration,
    pub sla_deadline: Duration,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            idle_sleep: config.idle_sleep(),
            sla_deadline: config.sla_deadline(),
        }
    }
}

/// Collaborators a worker talks to.
#[derive(Clone)]
pub struct WorkerClients {
    pub requests: Arc<dyn JobChannel>,
    pub responses: Arc<dyn ResponseChannel>,
    pub inputs: Arc<dyn ObjectStore>,
    pub results: Arc<dyn ObjectStore>,
    pub classifier: Arc<dyn Classifier>,
}

pub struct Worker {
    clients: WorkerClients,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(clients: WorkerClients, settings: WorkerSettings) -> Self {
        Self { clients, settings }
    }

    /// Poll until `shutdown` flips to true. Shutdown is observed between batches.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.settings.batch_size,
            sla_deadline_ms = self.settings.sla_deadline.as_millis() as u64,
            "Worker loop started"
        );

        while !*shutdown.borrow() {
            let idle = match self.poll_once().await {
                Ok(0) => {
                    tracing::trace!("No jobs available, sleeping");
                    true
                }
                Ok(count) => {
                    tracing::debug!(count, "Batch processed, checking for next batch");
                    false
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive jobs, will retry");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.settings.idle_sleep) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!("Worker loop stopped");
    }

    /// Receive one batch and process it sequentially.
    /// Returns the number of deliveries handled.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let batch = self.clients.requests.receive(self.settings.batch_size).await?;
        let count = batch.len();
        for delivery in batch {
            self.process(delivery).await;
        }
        Ok(count)
    }

    /// Drive a single delivery to a terminal state.
    pub async fn process(&self, delivery: Delivery) -> JobOutcome {
        let started = Instant::now();
        let request_time = chrono::Utc::now().timestamp_millis();
        let outcome = self.process_inner(&delivery, started, request_time).await;

        match &outcome {
            JobOutcome::Done => {
                metrics::counter!("classification_jobs_completed").increment(1);
                metrics::histogram!("classification_processing_seconds")
                    .record(started.elapsed().as_secs_f64());
            }
            JobOutcome::Unacknowledged => {
                metrics::counter!("classification_jobs_unacknowledged").increment(1);
            }
            JobOutcome::Dropped { stage, reason } => {
                let reason: &'static str = reason.into();
                tracing::debug!(%stage, reason, "Job dropped without acknowledgment");
                metrics::counter!("classification_jobs_dropped", "reason" => reason).increment(1);
            }
        }
        outcome
    }

    async fn process_inner(&self, delivery: &Delivery, started: Instant, request_time: i64) -> JobOutcome {
        let mut job = match Job::parse(&delivery.body) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(token = %delivery.token, error = %e, "Skipping unreadable job envelope");
                return dropped(Stage::Received, DropReason::Malformed);
            }
        };

        tracing::info!(
            job_id = ?job.id,
            storage_key = %job.storage_key,
            "Processing classification job"
        );

        let staged = match self.clients.inputs.get(&job.storage_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(storage_key = %job.storage_key, error = %e, "Failed to fetch input image");
                return dropped(Stage::Fetched, DropReason::FetchFailed);
            }
        };

        if let Err(e) = image::guess_format(&staged) {
            tracing::warn!(storage_key = %job.storage_key, error = %e, "Input is not a recognised image");
            return dropped(Stage::Staged, DropReason::NotAnImage);
        }
        tracing::debug!(storage_key = %job.storage_key, bytes = staged.len(), "Image staged");

        let label = match self.clients.classifier.classify(&staged).await {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!(storage_key = %job.storage_key, error = %e, "Classification failed");
                return dropped(Stage::Staged, DropReason::ClassifyFailed);
            }
        };

        let response_time = request_time + started.elapsed().as_millis() as i64;
        let age_ms = response_time - request_time;
        if age_ms > self.settings.sla_deadline.as_millis() as i64 {
            tracing::warn!(
                job_id = ?job.id,
                storage_key = %job.storage_key,
                age_ms,
                "Job exceeded its deadline, abandoning result"
            );
            return dropped(Stage::Classified, DropReason::DeadlineExceeded { age_ms });
        }

        tracing::debug!(storage_key = %job.storage_key, label = %label, age_ms, "Image classified");

        job.record_result(&label, request_time, response_time);
        let record = ResultRecord {
            name: job.output_name().to_string(),
            label,
        };

        if let Err(e) = self
            .clients
            .results
            .put(job.result_key(), record.to_string().as_bytes())
            .await
        {
            tracing::warn!(storage_key = %job.storage_key, error = %e, "Failed to store result");
            return dropped(Stage::Classified, DropReason::PublishFailed);
        }

        if let Err(e) = self.clients.responses.send(&job).await {
            tracing::warn!(storage_key = %job.storage_key, error = %e, "Failed to publish response");
            return dropped(Stage::Classified, DropReason::PublishFailed);
        }

        if let Err(e) = self.clients.requests.acknowledge(&delivery.token).await {
            tracing::warn!(
                job_id = ?job.id,
                token = %delivery.token,
                error = %e,
                "Result published but acknowledgment failed"
            );
            return JobOutcome::Unacknowledged;
        }

        tracing::info!(
            job_id = ?job.id,
            name = %record.name,
            label = %record.label,
            age_ms,
            "Job completed successfully"
        );
        JobOutcome::Done
    }
}

fn dropped(stage: Stage, reason: DropReason) -> JobOutcome {
    JobOutcome::Dropped { stage, reason }
}
