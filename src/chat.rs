//! Chat completions (`chat/completions`), whole and streamed.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::ClientInner,
    errors::{Error, Result, ValidationError},
    http::{RequestOptions, ResponseMetadata},
    types::{Role, Usage, impl_api_response},
};

#[cfg(feature = "streaming")]
use crate::sse::EventStream;

const RESOURCE: &str = "chat/completions";

/// One message in a chat conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Request body for `chat/completions`.
///
/// `stream` is managed by [`ChatClient`]; setting it by hand has no effect.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub n: Option<u32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub user: Option<String>,
    pub stream: Option<bool>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::system(content))
    }

    pub fn user(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::user(content))
    }

    pub fn assistant(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::assistant(content))
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Validation(
                ValidationError::new("model is required").with_field("model"),
            ));
        }
        if self.messages.is_empty() {
            return Err(Error::Validation(
                ValidationError::new("at least one message is required").with_field("messages"),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Validation(
                    ValidationError::new("temperature must be between 0 and 2")
                        .with_field("temperature"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Whole response of a non-streaming chat call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl ChatCompletion {
    /// Content of the first choice, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

/// Incremental message fields carried by a streamed chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One partial result of a streamed chat call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChunkChoice>,
    #[serde(skip)]
    pub metadata: ResponseMetadata,
}

impl ChatCompletionChunk {
    /// Text delta of the first choice, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }
}

impl_api_response!(ChatCompletion, ChatCompletionChunk);

/// Client for chat completions.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ChatClient {
    pub async fn create(
        &self,
        mut req: ChatRequest,
        options: RequestOptions,
    ) -> Result<ChatCompletion> {
        req.validate()?;
        req.stream = None;
        self.inner
            .execute(Method::POST, RESOURCE, Some(&req), &options)
            .await
    }

    /// Stream chunks as they arrive. Each chunk carries the response metadata.
    ///
    /// A call cancelled before the response arrives returns an empty stream.
    #[cfg(feature = "streaming")]
    pub async fn stream(
        &self,
        mut req: ChatRequest,
        options: RequestOptions,
    ) -> Result<EventStream<ChatCompletionChunk>> {
        req.validate()?;
        req.stream = Some(true);
        let stream = self.inner.execute_stream(RESOURCE, &req, &options).await?;
        Ok(stream.stamp_metadata())
    }
}

/// Folds streamed chunks into the assembled assistant message.
#[cfg(feature = "streaming")]
pub struct ChatStreamAccumulator {
    inner: EventStream<ChatCompletionChunk>,
    text: String,
    role: Option<Role>,
    finish_reason: Option<String>,
    chunks: usize,
}

#[cfg(feature = "streaming")]
impl ChatStreamAccumulator {
    pub fn new(stream: EventStream<ChatCompletionChunk>) -> Self {
        Self {
            inner: stream,
            text: String::new(),
            role: None,
            finish_reason: None,
            chunks: 0,
        }
    }

    /// Pull the next non-empty text delta of the first choice.
    pub async fn next_delta(&mut self) -> Result<Option<String>> {
        use futures_util::StreamExt;

        while let Some(item) = self.inner.next().await {
            let chunk = item?;
            self.chunks += 1;
            let Some(choice) = chunk.choices.into_iter().find(|c| c.index == 0) else {
                continue;
            };
            if let Some(role) = choice.delta.role {
                self.role = Some(role);
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
            match choice.delta.content {
                Some(delta) if !delta.is_empty() => {
                    self.text.push_str(&delta);
                    return Ok(Some(delta));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Drain the stream and return the full text.
    pub async fn collect_text(mut self) -> Result<String> {
        while self.next_delta().await?.is_some() {}
        Ok(self.text)
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Number of chunks consumed, including those without text.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        self.inner.metadata()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_model_and_messages() {
        let err = ChatRequest::new("").user("hi").validate().unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.field.as_deref() == Some("model")));

        let err = ChatRequest::new("gpt-4o").validate().unwrap_err();
        assert!(matches!(err, Error::Validation(ref v) if v.field.as_deref() == Some("messages")));

        let err = ChatRequest::new("gpt-4o")
            .user("hi")
            .temperature(3.5)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        ChatRequest::new("gpt-4o").system("be brief").user("hi").validate().unwrap();
    }

    #[test]
    fn first_text_is_explicit() {
        let completion: ChatCompletion = serde_json::from_str(
            r#"{"id":"chatcmpl-1","object":"chat.completion","created":1,"model":"gpt-4o",
                "choices":[{"index":0,"message":{"role":"assistant","content":"Hello!"},
                    "finish_reason":"stop"}],
                "usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        )
        .unwrap();
        assert_eq!(completion.first_text(), Some("Hello!"));
        assert_eq!(completion.usage.as_ref().map(|u| u.total_tokens), Some(5));

        let empty = ChatCompletion {
            choices: Vec::new(),
            ..completion
        };
        assert_eq!(empty.first_text(), None);
    }

    #[test]
    fn chunk_tolerates_sparse_deltas() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"c","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.first_text(), None);
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[cfg(feature = "streaming")]
    #[tokio::test]
    async fn accumulator_folds_deltas() {
        use bytes::Bytes;
        use futures_util::stream;
        use tokio_util::sync::CancellationToken;

        let body = concat!(
            "data: {\"id\":\"c\",\"choices\":[{\"index\":0,",
            "\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"id\":\"c\",\"choices\":[{\"index\":0,",
            "\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let events = EventStream::<ChatCompletionChunk>::from_byte_stream(
            stream::iter(vec![Ok::<_, Error>(Bytes::from_static(body.as_bytes()))]),
            ResponseMetadata::default(),
            CancellationToken::new(),
        );
        let mut acc = ChatStreamAccumulator::new(events);
        assert_eq!(acc.next_delta().await.unwrap().as_deref(), Some("Hel"));
        assert_eq!(acc.next_delta().await.unwrap().as_deref(), Some("lo"));
        assert_eq!(acc.next_delta().await.unwrap(), None);
        assert_eq!(acc.text(), "Hello");
        assert_eq!(acc.role(), Some(Role::Assistant));
        assert_eq!(acc.finish_reason(), Some("stop"));
        assert_eq!(acc.chunks(), 4);
    }
}
