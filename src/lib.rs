//! Async Rust client for the OpenAI HTTP API and its Azure-hosted gateway.
//!
//! The [`Client`] resolves a [`Credential`] and endpoint [`Settings`] once at
//! construction, then every typed endpoint (chat, completions, embeddings,
//! moderations, images, models) goes through the same generic dispatcher.
//! Streaming calls return an [`EventStream`] of typed partial results.
#![cfg_attr(docsrs, feature(doc_cfg))]
// RequestFailed carries diagnostics inline; boxing it would complicate matching.
#![allow(clippy::result_large_err)]

use std::time::Duration;

/// Public API domain used in Direct mode.
pub const DEFAULT_DOMAIN: &str = "api.openai.com";

/// API version segment used in Direct and Proxy mode when none is given.
pub const DEFAULT_API_VERSION: &str = "v1";

/// Domain suffix of Gateway mode resources.
pub const GATEWAY_DOMAIN: &str = "openai.azure.com";

/// `api-version` query value used in Gateway mode when none is given.
pub const DEFAULT_GATEWAY_API_VERSION: &str = "2023-05-01";

/// File name searched for when discovering a [`Configuration`].
pub const CONFIGURATION_FILE: &str = "openai.config.json";

/// Server-side processing time in milliseconds.
pub const PROCESSING_TIME_HEADER: &str = "openai-processing-ms";

/// Organization header, sent on requests and echoed on responses.
pub const ORGANIZATION_HEADER: &str = "openai-organization";

/// HTTP header name for request ID tracing.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub const VERSION_HEADER: &str = "openai-version";

/// Gateway mode key header (when directory auth is off).
pub(crate) const GATEWAY_API_KEY_HEADER: &str = "api-key";

/// Default User-Agent header value.
pub(crate) const DEFAULT_CLIENT_HEADER: &str =
    concat!("openai-client-rust/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout (60 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

mod auth;
mod chat;
mod client;
mod completions;
mod embeddings;
mod errors;
mod http;
mod images;
mod models;
mod moderations;
mod settings;
#[cfg(feature = "streaming")]
mod sse;
mod telemetry;
mod types;

#[doc(hidden)]
pub mod testing;

pub use auth::{
    API_KEY_ENV_VARS, API_KEY_PREFIX, ApiKey, CREDENTIALS_FILE, Credential,
    ORGANIZATION_ENV_VARS, ORGANIZATION_PREFIX, OrganizationId, SESSION_KEY_PREFIX,
};
pub use chat::{
    ChatChoice, ChatChunkChoice, ChatClient, ChatCompletion, ChatCompletionChunk, ChatDelta,
    ChatMessage, ChatRequest,
};
#[cfg(feature = "streaming")]
pub use chat::ChatStreamAccumulator;
pub use client::{Client, Config, decode_body, encode_body};
pub use completions::{Completion, CompletionChoice, CompletionRequest, CompletionsClient};
pub use embeddings::{
    Embedding, EmbeddingInput, EmbeddingRequest, EmbeddingResponse, EmbeddingsClient,
};
pub use errors::{
    Error, RequestFailed, Result, TransportError, TransportErrorKind, ValidationError,
};
pub use http::{
    HeaderEntry, HeaderList, RateLimits, RequestOptions, ResponseMetadata, parse_go_duration,
};
pub use images::{ImageData, ImageRequest, ImageResponse, ImagesClient};
pub use models::{Model, ModelsClient};
pub use moderations::{
    ModerationRequest, ModerationResponse, ModerationResult, ModerationsClient,
};
pub use settings::{Configuration, EndpointMode, Settings, SettingsSources};
#[cfg(feature = "streaming")]
pub use sse::{DONE_SENTINEL, EventStream, Frame, FrameDecoder};
pub use telemetry::{HttpRequestMetrics, MetricsCallbacks, RequestContext, StreamFirstEventMetrics};
pub use types::{ApiResponse, DeletedResponse, ListResponse, Role, Usage};

/// Re-exported so callers can build cancellation signals without a direct dependency.
pub use tokio_util::sync::CancellationToken;
