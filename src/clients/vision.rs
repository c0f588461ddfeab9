//! Image classification via a Custom Vision prediction endpoint.
//!
//! One POST of the raw image bytes per call. Every failure is folded into a
//! `Classification::Error` so callers only ever branch on the result shape.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::types::ClientError;
use crate::config::VisionConfig;

/// Outcome of one classification: the best tag, or why there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Classification {
    Tag { tag: String, probability: f64 },
    Error { error: String },
}

impl Classification {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { error: msg.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn tag(&self) -> Option<(&str, f64)> {
        match self {
            Self::Tag { tag, probability } => Some((tag.as_str(), *probability)),
            Self::Error { .. } => None,
        }
    }
}

pub const MSG_EMPTY_IMAGE: &str = "이미지 데이터가 비어있습니다.";
pub const MSG_NOTHING_RECOGNIZED: &str = "Custom Vision이 아무것도 인식하지 못했어요.";

/// One prediction as returned by the endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub tag_name: String,
    pub probability: f64,
    #[serde(default)]
    pub tag_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictionResponse {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

/// Highest-probability prediction; on equal scores the earliest wins.
pub fn best_prediction(predictions: &[Prediction]) -> Option<&Prediction> {
    predictions.iter().fold(None, |best, p| match best {
        Some(b) if b.probability >= p.probability => Some(b),
        _ => Some(p),
    })
}

/// Reduce a prediction list to a single result.
pub fn interpret(response: &PredictionResponse) -> Classification {
    match best_prediction(&response.predictions) {
        Some(p) => Classification::Tag {
            tag: p.tag_name.clone(),
            probability: p.probability.clamp(0.0, 1.0),
        },
        None => Classification::error(MSG_NOTHING_RECOGNIZED),
    }
}

fn error_message(err: &ClientError) -> String {
    match err {
        ClientError::EmptyInput(_) => MSG_EMPTY_IMAGE.to_string(),
        ClientError::MissingCredential(name) => {
            format!("Custom Vision 설정({})이 없어 이미지를 분석할 수 없어요.", name)
        }
        other => format!("Custom Vision API 호출 에러: {}", other),
    }
}

/// Custom Vision classifier client.
pub struct VisionClient {
    config: VisionConfig,
    agent: ureq::Agent,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(concat!("ssdam/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { config, agent }
    }

    /// `{endpoint}customvision/v3.0/Prediction/{project}/classify/iterations/{iteration}/image`
    pub fn prediction_url(&self) -> Result<String, ClientError> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or(ClientError::MissingCredential("AZURE_CV_ENDPOINT"))?;
        let project = self
            .config
            .project_id
            .as_deref()
            .ok_or(ClientError::MissingCredential("AZURE_CV_PROJECT_ID"))?;
        Ok(format!(
            "{}/customvision/v3.0/Prediction/{}/classify/iterations/{}/image",
            endpoint.trim_end_matches('/'),
            project,
            self.config.iteration,
        ))
    }

    /// Classify raw image bytes. Never fails; errors come back as `Classification::Error`.
    pub fn classify(&self, image: &[u8]) -> Classification {
        match self.try_classify(image) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "image classification failed");
                Classification::error(error_message(&e))
            }
        }
    }

    fn try_classify(&self, image: &[u8]) -> Result<Classification, ClientError> {
        if image.is_empty() {
            return Err(ClientError::EmptyInput("image"));
        }
        let key = self
            .config
            .prediction_key
            .as_deref()
            .ok_or(ClientError::MissingCredential("AZURE_CV_PREDICTION_KEY"))?;
        let url = self.prediction_url()?;

        let response = self
            .agent
            .post(&url)
            .set("Prediction-Key", key)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(image)?;

        let body: PredictionResponse = response
            .into_json()
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let result = interpret(&body);
        if let Some((tag, probability)) = result.tag() {
            info!(tag, probability, candidates = body.predictions.len(), "image classified");
        }
        Ok(result)
    }
}
