use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::instance::{FleetSnapshot, Instance, InstanceId, InstanceState};

/// What a newly launched worker boots from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTemplate {
    pub image_id: String,
    pub instance_type: String,
    pub security_group_id: String,
    pub user_data: String,
}

/// Compute API used to observe and resize the worker fleet.
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn list_instances(
        &self,
        image_id: &str,
        state: InstanceState,
    ) -> Result<Vec<InstanceId>, FleetError>;

    async fn launch(&self, count: u32, template: &LaunchTemplate) -> Result<Vec<InstanceId>, FleetError>;

    async fn terminate(&self, id: &InstanceId) -> Result<(), FleetError>;

    async fn tag(&self, id: &InstanceId, key: &str, value: &str) -> Result<(), FleetError>;
}

/// JSON client for the compute fleet REST API.
pub struct HttpFleetApi {
    http: Client,
    base_url: String,
    api_token: String,
}

#[derive(Deserialize)]
struct InstanceList {
    instances: Vec<Instance>,
}

#[derive(Serialize)]
struct LaunchRequest<'a> {
    image_id: &'a str,
    instance_type: &'a str,
    security_group_ids: [&'a str; 1],
    user_data: &'a str,
    count: u32,
}

#[derive(Serialize)]
struct TagRequest<'a> {
    key: &'a str,
    value: &'a str,
}

impl HttpFleetApi {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }
}

#[async_trait]
impl FleetApi for HttpFleetApi {
    async fn list_instances(
        &self,
        image_id: &str,
        state: InstanceState,
    ) -> Result<Vec<InstanceId>, FleetError> {
        let response = self
            .http
            .get(format!("{}/instances", self.base_url))
            .bearer_auth(&self.api_token)
            .query(&[("image_id", image_id), ("state", state.as_ref())])
            .send()
            .await
            .map_err(FleetError::Http)?;
        let list: InstanceList = check(response)?.json().await.map_err(FleetError::Http)?;

        // Filter again in case the API ignores the state parameter.
        Ok(list
            .instances
            .into_iter()
            .filter(|i| i.state == state)
            .map(|i| i.id)
            .collect())
    }

    async fn launch(&self, count: u32, template: &LaunchTemplate) -> Result<Vec<InstanceId>, FleetError> {
        let request = LaunchRequest {
            image_id: &template.image_id,
            instance_type: &template.instance_type,
            security_group_ids: [&template.security_group_id],
            user_data: &template.user_data,
            count,
        };
        let response = self
            .http
            .post(format!("{}/instances", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(FleetError::Http)?;
        let list: InstanceList = check(response)?.json().await.map_err(FleetError::Http)?;
        Ok(list.instances.into_iter().map(|i| i.id).collect())
    }

    async fn terminate(&self, id: &InstanceId) -> Result<(), FleetError> {
        let response = self
            .http
            .delete(format!("{}/instances/{}", self.base_url, id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(FleetError::Http)?;
        // Already gone counts as terminated.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response)?;
        Ok(())
    }

    async fn tag(&self, id: &InstanceId, key: &str, value: &str) -> Result<(), FleetError> {
        let response = self
            .http
            .post(format!("{}/instances/{}/tags", self.base_url, id))
            .bearer_auth(&self.api_token)
            .json(&TagRequest { key, value })
            .send()
            .await
            .map_err(FleetError::Http)?;
        check(response)?;
        Ok(())
    }
}

fn check(response: reqwest::Response) -> Result<reqwest::Response, FleetError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FleetError::Status(status.as_u16()))
    }
}

/// The fleet as seen by this deployment: instances booted from its image.
#[derive(Clone)]
pub struct FleetDirectory {
    api: Arc<dyn FleetApi>,
    template: LaunchTemplate,
}

impl FleetDirectory {
    pub fn new(api: Arc<dyn FleetApi>, template: LaunchTemplate) -> Self {
        Self { api, template }
    }

    pub async fn ids_in_state(&self, state: InstanceState) -> Result<Vec<InstanceId>, FleetError> {
        self.api.list_instances(&self.template.image_id, state).await
    }

    /// Current running and pending members.
    pub async fn snapshot(&self) -> Result<FleetSnapshot, FleetError> {
        let running = self.ids_in_state(InstanceState::Running).await?;
        let pending = self.ids_in_state(InstanceState::Pending).await?;
        Ok(FleetSnapshot { running, pending })
    }

    pub async fn launch(&self, count: u32) -> Result<Vec<InstanceId>, FleetError> {
        self.api.launch(count, &self.template).await
    }

    pub async fn terminate(&self, id: &InstanceId) -> Result<(), FleetError> {
        self.api.terminate(id).await
    }

    pub async fn tag(&self, id: &InstanceId, key: &str, value: &str) -> Result<(), FleetError> {
        self.api.tag(id, key, value).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fleet API returned HTTP {0}")]
    Status(u16),
}
