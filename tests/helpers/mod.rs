//! In-memory stand-ins for the queue, object store, classifier and fleet API

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use classifier_fleet::models::instance::{Instance, InstanceId, InstanceState};
use classifier_fleet::models::job::{Delivery, DeliveryToken, Job};
use classifier_fleet::services::classifier::{ClassifyError, Classifier};
use classifier_fleet::services::fleet::{FleetApi, FleetDirectory, FleetError, LaunchTemplate};
use classifier_fleet::services::queue::{JobChannel, QueueError, ResponseChannel};
use classifier_fleet::services::storage::{ObjectStore, StorageError};

fn protocol_error(what: &str) -> QueueError {
    QueueError::Protocol(format!("injected failure: {what}"))
}

/// Queue that hands out each pushed body once and records acknowledgments.
#[derive(Default)]
pub struct FakeChannel {
    pending: Mutex<VecDeque<String>>,
    in_flight: Mutex<HashMap<DeliveryToken, String>>,
    acknowledged: Mutex<Vec<DeliveryToken>>,
    sent: Mutex<Vec<Job>>,
    depths: Mutex<VecDeque<u64>>,
    next_token: AtomicU64,
    pub fail_receive: AtomicBool,
    pub fail_depth: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_ack: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, body: impl Into<String>) {
        self.pending.lock().unwrap().push_back(body.into());
    }

    /// Depths returned by successive `approximate_depth` calls.
    /// Falls back to the pending length once exhausted.
    pub fn script_depths(&self, depths: &[u64]) {
        self.depths.lock().unwrap().extend(depths.iter().copied());
    }

    pub async fn receive_one(&self) -> Delivery {
        self.receive(1)
            .await
            .unwrap()
            .pop()
            .expect("a queued delivery")
    }

    pub fn acknowledged(&self) -> Vec<DeliveryToken> {
        self.acknowledged.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<Job> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobChannel for FakeChannel {
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        if self.fail_receive.load(Ordering::SeqCst) {
            return Err(protocol_error("receive"));
        }
        let mut pending = self.pending.lock().unwrap();
        let mut in_flight = self.in_flight.lock().unwrap();
        let take = max.min(pending.len());
        Ok(pending
            .drain(..take)
            .map(|body| {
                let n = self.next_token.fetch_add(1, Ordering::SeqCst);
                let token = DeliveryToken(format!("token-{n}"));
                in_flight.insert(token.clone(), body.clone());
                Delivery { token, body }
            })
            .collect())
    }

    async fn acknowledge(&self, token: &DeliveryToken) -> Result<(), QueueError> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(protocol_error("acknowledge"));
        }
        if self.in_flight.lock().unwrap().remove(token).is_some() {
            self.acknowledged.lock().unwrap().push(token.clone());
        }
        Ok(())
    }

    async fn approximate_depth(&self) -> Result<u64, QueueError> {
        if self.fail_depth.load(Ordering::SeqCst) {
            return Err(protocol_error("depth"));
        }
        if let Some(depth) = self.depths.lock().unwrap().pop_front() {
            return Ok(depth);
        }
        Ok(self.pending.lock().unwrap().len() as u64)
    }
}

#[async_trait]
impl ResponseChannel for FakeChannel {
    async fn send(&self, job: &Job) -> Result<(), QueueError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(protocol_error("send"));
        }
        self.sent.lock().unwrap().push(job.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_put: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), data.to_vec());
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StorageError::Status(503));
        }
        self.insert(key, data);
        Ok(())
    }
}

/// Returns a fixed label after an optional (tokio-clock) delay.
pub struct FakeClassifier {
    label: String,
    delay: Duration,
    pub fail: AtomicBool,
}

impl FakeClassifier {
    pub fn new(label: &str) -> Arc<Self> {
        Self::with_delay(label, Duration::ZERO)
    }

    pub fn with_delay(label: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            delay,
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _image_bytes: &[u8]) -> Result<String, ClassifyError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClassifyError::NoPrediction);
        }
        Ok(self.label.clone())
    }
}

/// Fleet whose launches start out pending and whose terminations are immediate.
#[derive(Default)]
pub struct FakeFleet {
    instances: Mutex<Vec<Instance>>,
    launches: Mutex<Vec<u32>>,
    terminated: Mutex<Vec<InstanceId>>,
    tags: Mutex<Vec<(InstanceId, String, String)>>,
    next_id: AtomicU64,
    pub fail_launch: AtomicBool,
    pub fail_list: AtomicBool,
}

impl FakeFleet {
    pub fn with(running: usize, pending: usize) -> Arc<Self> {
        let fleet = Self::default();
        for _ in 0..running {
            fleet.add(InstanceState::Running);
        }
        for _ in 0..pending {
            fleet.add(InstanceState::Pending);
        }
        Arc::new(fleet)
    }

    fn add(&self, state: InstanceState) -> InstanceId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = InstanceId(format!("i-{n}"));
        self.instances.lock().unwrap().push(Instance {
            id: id.clone(),
            state,
        });
        id
    }

    /// Move every pending instance to running.
    pub fn boot_pending(&self) {
        for instance in self.instances.lock().unwrap().iter_mut() {
            if instance.state == InstanceState::Pending {
                instance.state = InstanceState::Running;
            }
        }
    }

    pub fn count(&self, state: InstanceState) -> usize {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.state == state)
            .count()
    }

    pub fn launches(&self) -> Vec<u32> {
        self.launches.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<InstanceId> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<(InstanceId, String, String)> {
        self.tags.lock().unwrap().clone()
    }

    pub fn directory(self: &Arc<Self>) -> FleetDirectory {
        FleetDirectory::new(
            self.clone(),
            LaunchTemplate {
                image_id: "img-classifier".into(),
                instance_type: "t2.micro".into(),
                security_group_id: "sg-test".into(),
                user_data: "#!/bin/bash".into(),
            },
        )
    }
}

#[async_trait]
impl FleetApi for FakeFleet {
    async fn list_instances(
        &self,
        _image_id: &str,
        state: InstanceState,
    ) -> Result<Vec<InstanceId>, FleetError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(FleetError::Status(500));
        }
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.state == state)
            .map(|i| i.id.clone())
            .collect())
    }

    async fn launch(&self, count: u32, _template: &LaunchTemplate) -> Result<Vec<InstanceId>, FleetError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(FleetError::Status(503));
        }
        self.launches.lock().unwrap().push(count);
        Ok((0..count).map(|_| self.add(InstanceState::Pending)).collect())
    }

    async fn terminate(&self, id: &InstanceId) -> Result<(), FleetError> {
        let mut instances = self.instances.lock().unwrap();
        if let Some(instance) = instances.iter_mut().find(|i| &i.id == id) {
            instance.state = InstanceState::Terminated;
        }
        self.terminated.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn tag(&self, id: &InstanceId, key: &str, value: &str) -> Result<(), FleetError> {
        self.tags
            .lock()
            .unwrap()
            .push((id.clone(), key.to_string(), value.to_string()));
        Ok(())
    }
}
