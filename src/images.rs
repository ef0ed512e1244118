//! Image generation (`images/generations`).

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientInner,
    errors::{Error, Result, ValidationError},
    http::{RequestOptions, ResponseMetadata},
    types::impl_api_response,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub n: Option<u32>,
    /// e.g. `1024x1024`.
    pub size: Option<String>,
    /// `url` or `b64_json`.
    pub response_format: Option<String>,
    pub user: Option<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub b64_json: Option<String>,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub created: i64,
    pub data: Vec<ImageData>,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl_api_response!(ImageResponse);

/// Client for image generation operations.
#[derive(Clone)]
pub struct ImagesClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ImagesClient {
    /// Generate images from a text prompt.
    pub async fn generate(
        &self,
        req: ImageRequest,
        options: RequestOptions,
    ) -> Result<ImageResponse> {
        if req.prompt.trim().is_empty() {
            return Err(Error::Validation(
                ValidationError::new("prompt is required").with_field("prompt"),
            ));
        }
        self.inner
            .execute(Method::POST, "images/generations", Some(&req), &options)
            .await
    }
}
