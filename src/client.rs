use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::{
    Method,
    header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    DEFAULT_CLIENT_HEADER, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    GATEWAY_API_KEY_HEADER, ORGANIZATION_HEADER,
    auth::Credential,
    chat::ChatClient,
    completions::CompletionsClient,
    embeddings::EmbeddingsClient,
    errors::{Error, Result},
    http::{
        HeaderList, RequestOptions, ResponseMetadata, parse_request_failed,
        request_id_from_headers,
    },
    images::ImagesClient,
    models::ModelsClient,
    moderations::ModerationsClient,
    settings::{Configuration, EndpointMode, Settings, SettingsSources, discover_quietly},
    telemetry::{HttpRequestMetrics, MetricsCallbacks, RequestContext, Telemetry},
    types::ApiResponse,
};

#[cfg(feature = "streaming")]
use crate::sse::EventStream;

/// Client construction options.
///
/// Without an injected `configuration`, an `openai.config.json` is looked up
/// from the working directory upwards and used in its place.
///
/// Credentials are taken from the first of: `credential`, `api_key`
/// (+ `organization`), the configuration's `apiKey`, then the environment and
/// local `.openai` files. Endpoint settings come from `settings`, then the
/// configuration, then the process default.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub credential: Option<Credential>,
    pub api_key: Option<String>,
    pub organization: Option<String>,
    /// Injected configuration object.
    pub configuration: Option<Configuration>,
    pub settings: Option<Settings>,
    pub http_client: Option<reqwest::Client>,
    /// Override the `User-Agent` value.
    pub client_header: Option<String>,
    /// Override the connect timeout (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Override the request timeout (defaults to 60s). Not applied to streams.
    pub timeout: Option<Duration>,
    /// Extra headers applied to every request.
    pub default_headers: Option<HeaderList>,
    /// Optional metrics callbacks (HTTP latency, first stream event latency).
    pub metrics: Option<MetricsCallbacks>,
}

/// Async API client. Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    settings: Arc<Settings>,
    credential: Credential,
    http: reqwest::Client,
    client_header: String,
    request_timeout: Duration,
    default_headers: Option<HeaderList>,
    telemetry: Telemetry,
}

impl Client {
    pub fn new(cfg: Config) -> Result<Self> {
        let configuration = cfg.configuration.clone().or_else(|| {
            std::env::current_dir()
                .ok()
                .and_then(|dir| discover_quietly(&dir))
        });
        let credential = resolve_credential(&cfg, configuration.as_ref())?;
        let settings = match (cfg.settings, configuration) {
            (Some(settings), _) => Arc::new(settings),
            (None, Some(configuration)) => Arc::new(Settings::resolve(
                &SettingsSources::new().configuration(configuration),
            )),
            (None, None) => Settings::process_default(),
        };

        let http = match cfg.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
                .build()
                .map_err(|err| Error::Config(format!("failed to build http client: {err}")))?,
        };

        let client_header = cfg
            .client_header
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_HEADER.to_string());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            mode = ?settings.mode(),
            api_version = settings.api_version(),
            "client configured"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                settings,
                credential,
                http,
                client_header,
                request_timeout: cfg.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
                default_headers: cfg.default_headers,
                telemetry: Telemetry::new(cfg.metrics),
            }),
        })
    }

    /// Build a client from ambient credentials and the process default settings.
    pub fn from_env() -> Result<Self> {
        Self::new(Config::default())
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn credential(&self) -> &Credential {
        &self.inner.credential
    }

    pub fn chat(&self) -> ChatClient {
        ChatClient {
            inner: self.inner.clone(),
        }
    }

    pub fn completions(&self) -> CompletionsClient {
        CompletionsClient {
            inner: self.inner.clone(),
        }
    }

    pub fn embeddings(&self) -> EmbeddingsClient {
        EmbeddingsClient {
            inner: self.inner.clone(),
        }
    }

    pub fn images(&self) -> ImagesClient {
        ImagesClient {
            inner: self.inner.clone(),
        }
    }

    pub fn models(&self) -> ModelsClient {
        ModelsClient {
            inner: self.inner.clone(),
        }
    }

    pub fn moderations(&self) -> ModerationsClient {
        ModerationsClient {
            inner: self.inner.clone(),
        }
    }

    /// Call any resource and decode the typed response.
    ///
    /// Exactly one HTTP request is made; failures are never retried here.
    pub async fn send<Req, Resp>(
        &self,
        method: Method,
        resource: &str,
        body: Option<&Req>,
        options: RequestOptions,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + ApiResponse,
    {
        self.inner.execute(method, resource, body, &options).await
    }

    pub async fn get<Resp>(&self, resource: &str, options: RequestOptions) -> Result<Resp>
    where
        Resp: DeserializeOwned + ApiResponse,
    {
        self.inner
            .execute(Method::GET, resource, None::<&()>, &options)
            .await
    }

    pub async fn post<Req, Resp>(
        &self,
        resource: &str,
        body: &Req,
        options: RequestOptions,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + ApiResponse,
    {
        self.inner
            .execute(Method::POST, resource, Some(body), &options)
            .await
    }

    /// POST `body` to `resource` and decode the server-sent event stream.
    ///
    /// Cancelling `options.cancel` before the response headers arrive yields an
    /// empty, already-cancelled stream rather than an error.
    #[cfg(feature = "streaming")]
    pub async fn stream<Req, T>(
        &self,
        resource: &str,
        body: &Req,
        options: RequestOptions,
    ) -> Result<EventStream<T>>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.inner.execute_stream(resource, body, &options).await
    }
}

fn resolve_credential(
    cfg: &Config,
    configuration: Option<&Configuration>,
) -> Result<Credential> {
    if let Some(credential) = &cfg.credential {
        return Ok(credential.clone());
    }
    if let Some(key) = cfg.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Credential::new(key, cfg.organization.as_deref());
    }
    if let Some(configuration) = configuration {
        if let Some(credential) = configuration.credential()? {
            return Ok(credential);
        }
    }
    Credential::resolve()?.ok_or_else(|| {
        Error::Config("an API key is required (pass one or set OPENAI_API_KEY)".to_string())
    })
}

fn apply_header_list(
    mut builder: reqwest::RequestBuilder,
    headers: &HeaderList,
) -> Result<reqwest::RequestBuilder> {
    for entry in headers.iter() {
        if !entry.is_valid() {
            continue;
        }
        let name = HeaderName::from_bytes(entry.key.trim().as_bytes())
            .map_err(|err| Error::Config(format!("invalid header name: {err}")))?;
        let val = HeaderValue::from_str(entry.value.trim())
            .map_err(|err| Error::Config(format!("invalid header value: {err}")))?;
        builder = builder.header(name, val);
    }
    Ok(builder)
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Result<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

/// Serialize a request body with the wire profile shared by every resource.
///
/// Fields that serialize to `null` are dropped, so absent optionals never
/// reach the server.
pub fn encode_body<T: Serialize + ?Sized>(body: &T) -> Result<String> {
    let mut value = serde_json::to_value(body)?;
    strip_nulls(&mut value);
    Ok(serde_json::to_string(&value)?)
}

/// Decode a response body with the shared wire profile.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

impl ClientInner {
    fn request(&self, method: Method, resource: &str) -> Result<reqwest::RequestBuilder> {
        let url = self.settings.resource_url(resource);
        let url = reqwest::Url::parse(&url)
            .map_err(|err| Error::Config(format!("invalid url {url}: {err}")))?;
        Ok(self.http.request(method, url))
    }

    fn with_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        headers: &HeaderList,
        accept: &str,
    ) -> Result<reqwest::RequestBuilder> {
        builder = builder
            .header(ACCEPT, accept)
            .header(USER_AGENT, self.client_header.as_str());
        builder = self.apply_auth(builder);

        if let Some(defaults) = &self.default_headers {
            builder = apply_header_list(builder, defaults)?;
        }
        builder = apply_header_list(builder, headers)?;

        Ok(builder)
    }

    fn apply_auth(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let key = self.credential.api_key().as_str();
        builder = match (self.settings.mode(), self.settings.use_directory_auth()) {
            (EndpointMode::Gateway, false) => builder.header(GATEWAY_API_KEY_HEADER, key),
            _ => builder.bearer_auth(key),
        };
        if let Some(org) = self.credential.organization() {
            builder = builder.header(ORGANIZATION_HEADER, org.as_str());
        }
        builder
    }

    /// Issue one HTTP call and turn a non-success status into [`Error::RequestFailed`].
    async fn send(
        &self,
        method: Method,
        resource: &str,
        body: Option<String>,
        options: &RequestOptions,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };
        let mut builder = self.with_headers(
            self.request(method.clone(), resource)?,
            &options.headers,
            accept,
        )?;
        if let Some(body) = &body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        if !streaming {
            builder = builder.timeout(options.timeout.unwrap_or(self.request_timeout));
        }

        let ctx = RequestContext::new(method.as_str(), resource);
        let start = Instant::now();
        #[cfg(feature = "tracing")]
        tracing::debug!(method = %method, resource, streaming, "sending request");

        let resp = match cancellable(options.cancel.as_ref(), builder.send()).await? {
            Ok(resp) => resp,
            Err(err) => {
                if self.telemetry.http_enabled() {
                    self.telemetry.record_http(HttpRequestMetrics {
                        latency: start.elapsed(),
                        status: None,
                        error: Some(err.to_string()),
                        context: ctx,
                    });
                }
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, resource, "transport error");
                return Err(err.into());
            }
        };

        let status = resp.status();
        if self.telemetry.http_enabled() {
            self.telemetry.record_http(HttpRequestMetrics {
                latency: start.elapsed(),
                status: Some(status.as_u16()),
                error: (!status.is_success()).then(|| format!("http {}", status.as_u16())),
                context: ctx.with_request_id(request_id_from_headers(resp.headers())),
            });
        }
        if status.is_success() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                status = %status,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "request completed"
            );
            return Ok(resp);
        }

        let headers = resp.headers().clone();
        let text = cancellable(options.cancel.as_ref(), resp.text())
            .await?
            .unwrap_or_default();
        #[cfg(feature = "tracing")]
        tracing::warn!(status = %status, resource, "request failed");
        Err(Error::RequestFailed(parse_request_failed(
            status, &headers, text, body,
        )))
    }

    /// Send a typed request and decode the typed response, stamping header metadata.
    pub(crate) async fn execute<Req, Resp>(
        &self,
        method: Method,
        resource: &str,
        body: Option<&Req>,
        options: &RequestOptions,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + ApiResponse,
    {
        let body = body.map(encode_body).transpose()?;
        let resp = self.send(method, resource, body, options, false).await?;
        let metadata = ResponseMetadata::from_headers(resp.headers());
        let bytes = cancellable(options.cancel.as_ref(), resp.bytes()).await??;
        let mut parsed: Resp = decode_body(&bytes)?;
        *parsed.metadata_mut() = metadata;
        Ok(parsed)
    }

    #[cfg(feature = "streaming")]
    pub(crate) async fn execute_stream<Req, T>(
        &self,
        resource: &str,
        body: &Req,
        options: &RequestOptions,
    ) -> Result<EventStream<T>>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let body = encode_body(body)?;
        let cancel = options
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let start = Instant::now();
        let resp = match self
            .send(Method::POST, resource, Some(body), options, true)
            .await
        {
            Ok(resp) => resp,
            Err(Error::Cancelled) => return Ok(EventStream::cancelled(cancel)),
            Err(err) => return Err(err),
        };
        let ctx = RequestContext::new(Method::POST.as_str(), resource)
            .with_request_id(request_id_from_headers(resp.headers()));
        let telemetry = self.telemetry.stream_state(ctx, start);
        Ok(EventStream::from_response(resp, cancel, telemetry))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Serialize)]
    struct Sparse {
        model: &'static str,
        user: Option<String>,
        nested: Nested,
    }

    #[derive(Serialize)]
    struct Nested {
        n: Option<u32>,
        keep: Vec<Option<u32>>,
    }

    #[test]
    fn encode_body_drops_nulls_recursively() {
        let encoded = encode_body(&Sparse {
            model: "gpt-4o",
            user: None,
            nested: Nested {
                n: None,
                keep: vec![Some(1), None],
            },
        })
        .unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"model": "gpt-4o", "nested": {"keep": [1, null]}})
        );
        assert!(!encoded.contains("user"));
    }

    #[test]
    fn decode_body_reports_serialization_errors() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Shape {
            id: String,
        }
        let err = decode_body::<Shape>(b"{\"nope\":1}").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn explicit_credential_wins_over_api_key() {
        let credential = Credential::new("sk-explicit", None).unwrap();
        let cfg = Config {
            credential: Some(credential.clone()),
            api_key: Some("sk-other".into()),
            ..Default::default()
        };
        assert_eq!(resolve_credential(&cfg, None).unwrap(), credential);
    }

    #[test]
    fn invalid_explicit_key_fails_at_construction() {
        let err = Client::new(Config {
            api_key: Some("definitely-not-a-key".into()),
            ..Default::default()
        })
        .err()
        .expect("construction should fail");
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[test]
    fn configuration_supplies_key_and_settings() {
        let client = Client::new(Config {
            configuration: Some(Configuration {
                api_key: Some("sk-config".into()),
                use_azure_openai: true,
                resource_name: Some("contoso".into()),
                deployment_id: Some("chat".into()),
                ..Default::default()
            }),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.credential().api_key().as_str(), "sk-config");
        assert_eq!(client.settings().mode(), EndpointMode::Gateway);
    }

    fn built_request(client: &Client, resource: &str) -> reqwest::Request {
        let inner = &client.inner;
        inner
            .with_headers(
                inner.request(Method::GET, resource).unwrap(),
                &HeaderList::new(),
                "application/json",
            )
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn direct_mode_sends_bearer_and_organization() {
        let client = Client::new(Config {
            api_key: Some("sk-direct".into()),
            organization: Some("org-acme".into()),
            settings: Some(Settings::default()),
            ..Default::default()
        })
        .unwrap();
        let req = built_request(&client, "models");
        assert_eq!(req.url().as_str(), "https://api.openai.com/v1/models");
        assert_eq!(req.headers()["authorization"], "Bearer sk-direct");
        assert_eq!(req.headers()[ORGANIZATION_HEADER], "org-acme");
        assert!(req.headers().get(GATEWAY_API_KEY_HEADER).is_none());
    }

    #[test]
    fn gateway_mode_uses_api_key_header() {
        let client = Client::new(Config {
            api_key: Some("sk-gateway".into()),
            settings: Some(Settings::gateway("contoso", "gpt4", None, false)),
            ..Default::default()
        })
        .unwrap();
        let req = built_request(&client, "chat/completions");
        assert_eq!(
            req.url().as_str(),
            "https://contoso.openai.azure.com/openai/deployments/gpt4/chat/completions\
             ?api-version=2023-05-01"
        );
        assert_eq!(req.headers()[GATEWAY_API_KEY_HEADER], "sk-gateway");
        assert!(req.headers().get("authorization").is_none());
    }

    #[test]
    fn gateway_directory_auth_uses_bearer() {
        let client = Client::new(Config {
            api_key: Some("sk-directory-token".into()),
            settings: Some(Settings::gateway("contoso", "gpt4", Some("2024-02-01"), true)),
            ..Default::default()
        })
        .unwrap();
        let req = built_request(&client, "embeddings");
        assert!(req.url().as_str().ends_with("/embeddings?api-version=2024-02-01"));
        assert_eq!(req.headers()["authorization"], "Bearer sk-directory-token");
        assert!(req.headers().get(GATEWAY_API_KEY_HEADER).is_none());
    }

    #[test]
    fn default_and_per_call_headers_are_applied() {
        let mut defaults = HeaderList::new();
        defaults.push(crate::http::HeaderEntry::new("x-team".into(), "search".into()));
        let client = Client::new(Config {
            api_key: Some("sk-headers".into()),
            settings: Some(Settings::default()),
            client_header: Some("my-app/1.0".into()),
            default_headers: Some(defaults),
            ..Default::default()
        })
        .unwrap();
        let options = RequestOptions::default().with_header("x-trace", "t-1");
        let req = client
            .inner
            .with_headers(
                client.inner.request(Method::GET, "models").unwrap(),
                &options.headers,
                "application/json",
            )
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(req.headers()["x-team"], "search");
        assert_eq!(req.headers()["x-trace"], "t-1");
        assert_eq!(req.headers()["user-agent"], "my-app/1.0");
        assert_eq!(req.headers()["accept"], "application/json");
    }

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let out = cancellable(Some(&token), std::future::pending::<()>()).await;
        assert!(matches!(out, Err(Error::Cancelled)));

        let out = cancellable(None, async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }
}
