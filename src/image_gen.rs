use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::completion::ApiFailure;

pub type SharedImageDelegate = Arc<dyn ImageDelegate>;

/// An image attached by the user, carried as base64 plus its MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub data: String,
    pub mime_type: String,
}

/// Result of an image-generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub image_data: String,
    pub mime_type: String,
    pub prompt: String,
}

/// External image-generation collaborator. Not computed locally; the
/// orchestration core only relays prompts and optional anchor images.
#[async_trait]
pub trait ImageDelegate: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        anchor: Option<&ImageAttachment>,
    ) -> Result<GeneratedImage, ApiFailure>;
}

#[derive(Debug, Clone)]
pub struct ImageApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl ImageApiConfig {
    const BASE_URL_VARS: [&'static str; 2] = ["IMAGE_API_BASE_URL", "TABULA_IMAGE_API_BASE_URL"];
    const API_KEY_VARS: [&'static str; 2] = ["IMAGE_API_KEY", "TABULA_IMAGE_API_KEY"];
    const TIMEOUT_VARS: [&'static str; 1] = ["IMAGE_API_TIMEOUT_MS"];

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = Self::read_env(&Self::API_KEY_VARS)
            .context("Set IMAGE_API_KEY (or TABULA_IMAGE_API_KEY) to use image generation")?;
        let base_url = Self::read_env(&Self::BASE_URL_VARS)
            .unwrap_or_else(|| "http://127.0.0.1:8787/api/generate-image".to_string());
        let timeout_ms = Self::read_env(&Self::TIMEOUT_VARS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60_000);

        Ok(Self {
            base_url,
            api_key,
            timeout_ms,
        })
    }

    fn read_env(candidates: &[&'static str]) -> Option<String> {
        candidates.iter().find_map(|key| env::var(key).ok())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequestBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    anchor_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anchor_mime_type: Option<&'a str>,
}

/// HTTP client for the image-generation endpoint.
pub struct HttpImageClient {
    http: reqwest::Client,
    config: ImageApiConfig,
}

impl HttpImageClient {
    pub fn new(config: ImageApiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .context("Failed to build image HTTP client")?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(ImageApiConfig::from_env()?)
    }
}

#[async_trait]
impl ImageDelegate for HttpImageClient {
    #[instrument(level = "debug", skip_all, fields(prompt_len = prompt.len()))]
    async fn generate(
        &self,
        prompt: &str,
        anchor: Option<&ImageAttachment>,
    ) -> Result<GeneratedImage, ApiFailure> {
        let body = ImageRequestBody {
            prompt,
            anchor_image: anchor.map(|a| a.data.as_str()),
            anchor_mime_type: anchor.map(|a| a.mime_type.as_str()),
        };

        let response = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiFailure::Auth);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message: String = message.chars().take(300).collect();
            return Err(ApiFailure::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<GeneratedImage>()
            .await
            .map_err(|err| ApiFailure::Decode(err.to_string()))
    }
}

/// Deterministic in-process delegate, used when no image API is configured
/// and by the orchestrator tests.
pub struct MockImageDelegate;

#[async_trait]
impl ImageDelegate for MockImageDelegate {
    async fn generate(
        &self,
        prompt: &str,
        _anchor: Option<&ImageAttachment>,
    ) -> Result<GeneratedImage, ApiFailure> {
        Ok(GeneratedImage {
            image_data: "bW9jay1pbWFnZQ==".to_string(),
            mime_type: "image/png".to_string(),
            prompt: prompt.to_string(),
        })
    }
}

/// Build the HTTP delegate from the environment, optionally falling back to
/// the mock when configuration is missing.
pub fn build_image_delegate_from_env(default_to_mock: bool) -> anyhow::Result<SharedImageDelegate> {
    match HttpImageClient::from_env() {
        Ok(client) => Ok(Arc::new(client)),
        Err(err) if default_to_mock => {
            tracing::warn!(?err, "Falling back to the mock image delegate");
            Ok(Arc::new(MockImageDelegate))
        }
        Err(err) => Err(err),
    }
}
