//! Legacy text completions (`completions`).

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientInner,
    errors::{Error, Result, ValidationError},
    http::{RequestOptions, ResponseMetadata},
    types::{Usage, impl_api_response},
};

#[cfg(feature = "streaming")]
use crate::sse::EventStream;

const RESOURCE: &str = "completions";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub suffix: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub n: Option<u32>,
    pub logprobs: Option<u32>,
    pub echo: Option<bool>,
    pub stop: Option<Vec<String>>,
    pub user: Option<String>,
    pub stream: Option<bool>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Validation(
                ValidationError::new("model is required").with_field("model"),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Whole response, and also the shape of each streamed partial result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl Completion {
    pub fn first_text(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.text.as_str())
    }
}

impl_api_response!(Completion);

#[derive(Clone)]
pub struct CompletionsClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl CompletionsClient {
    pub async fn create(
        &self,
        mut req: CompletionRequest,
        options: RequestOptions,
    ) -> Result<Completion> {
        req.validate()?;
        req.stream = None;
        self.inner
            .execute(Method::POST, RESOURCE, Some(&req), &options)
            .await
    }

    #[cfg(feature = "streaming")]
    pub async fn stream(
        &self,
        mut req: CompletionRequest,
        options: RequestOptions,
    ) -> Result<EventStream<Completion>> {
        req.validate()?;
        req.stream = Some(true);
        let stream = self.inner.execute_stream(RESOURCE, &req, &options).await?;
        Ok(stream.stamp_metadata())
    }
}
