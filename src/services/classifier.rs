use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Image → label classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_bytes: &[u8]) -> Result<String, ClassifyError>;
}

const RESNET_MODEL: &str = "@cf/microsoft/resnet-50";

/// Client for the Cloudflare Workers AI ResNet-50 image classifier.
pub struct WorkersAiClassifier {
    http: Client,
    api_base: String,
    account_id: String,
    api_token: String,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    image: &'a [u8],
}

#[derive(Deserialize)]
struct ClassifyResponse {
    result: Vec<Prediction>,
}

#[derive(Deserialize)]
struct Prediction {
    label: String,
    score: f64,
}

impl WorkersAiClassifier {
    pub fn new(api_base: String, account_id: String, api_token: String) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            account_id,
            api_token,
        }
    }
}

#[async_trait]
impl Classifier for WorkersAiClassifier {
    /// Returns the highest-scoring ImageNet label for the image.
    async fn classify(&self, image_bytes: &[u8]) -> Result<String, ClassifyError> {
        let url = format!(
            "{}/accounts/{}/ai/run/{}",
            self.api_base, self.account_id, RESNET_MODEL
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&ClassifyRequest { image: image_bytes })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(ClassifyError::Http)?;

        let body: ClassifyResponse = response.json().await.map_err(ClassifyError::Http)?;

        body.result
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .map(|p| p.label)
            .ok_or(ClassifyError::NoPrediction)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier returned no predictions")]
    NoPrediction,
}
