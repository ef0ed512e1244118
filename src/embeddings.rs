//! Embeddings (`embeddings`).

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientInner,
    errors::{Error, Result, ValidationError},
    http::{RequestOptions, ResponseMetadata},
    types::{Usage, impl_api_response},
};

/// A single string or a batch of strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    fn is_empty(&self) -> bool {
        match self {
            EmbeddingInput::Single(s) => s.is_empty(),
            EmbeddingInput::Batch(items) => items.is_empty(),
        }
    }
}

impl From<&str> for EmbeddingInput {
    fn from(value: &str) -> Self {
        EmbeddingInput::Single(value.to_string())
    }
}

impl From<String> for EmbeddingInput {
    fn from(value: String) -> Self {
        EmbeddingInput::Single(value)
    }
}

impl From<Vec<String>> for EmbeddingInput {
    fn from(value: Vec<String>) -> Self {
        EmbeddingInput::Batch(value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: EmbeddingInput,
    #[serde(default)]
    pub dimensions: Option<u32>,
    #[serde(default)]
    pub user: Option<String>,
}

impl EmbeddingRequest {
    pub fn new(model: impl Into<String>, input: impl Into<EmbeddingInput>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            dimensions: None,
            user: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    #[serde(default)]
    pub object: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub object: String,
    pub data: Vec<Embedding>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl_api_response!(EmbeddingResponse);

#[derive(Clone)]
pub struct EmbeddingsClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl EmbeddingsClient {
    pub async fn create(
        &self,
        req: EmbeddingRequest,
        options: RequestOptions,
    ) -> Result<EmbeddingResponse> {
        if req.input.is_empty() {
            return Err(Error::Validation(
                ValidationError::new("input is required").with_field("input"),
            ));
        }
        self.inner
            .execute(Method::POST, "embeddings", Some(&req), &options)
            .await
    }
}
