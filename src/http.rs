use std::time::Duration;

use reqwest::{StatusCode, header::HeaderMap};
use tokio_util::sync::CancellationToken;

use crate::{
    ORGANIZATION_HEADER, PROCESSING_TIME_HEADER, REQUEST_ID_HEADER, VERSION_HEADER,
    errors::RequestFailed,
};

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub headers: HeaderList,
    /// Overrides the client timeout. Ignored for streaming calls.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderEntry::new(key.into(), value.into()));
        self
    }

    /// Override the overall request timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort the call (or stop the stream) when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Structured header list with validation.
#[derive(Clone, Debug, Default)]
pub struct HeaderList(Vec<HeaderEntry>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a header entry.
    ///
    /// # Panics
    /// Panics if the header key or value is empty or contains only whitespace.
    pub fn push(&mut self, entry: HeaderEntry) {
        assert!(
            entry.is_valid(),
            "Invalid header: key and value must be non-empty (got key={:?}, value={:?})",
            entry.key,
            entry.value
        );
        self.0.push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.0.iter()
    }
}

#[derive(Clone, Debug)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }

    pub fn is_valid(&self) -> bool {
        !(self.key.trim().is_empty() || self.value.trim().is_empty())
    }
}

/// Rate-limit state reported alongside a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimits {
    pub limit_requests: Option<u64>,
    pub limit_tokens: Option<u64>,
    pub remaining_requests: Option<u64>,
    pub remaining_tokens: Option<u64>,
    pub reset_requests: Option<Duration>,
    pub reset_tokens: Option<Duration>,
}

/// Response metadata read from HTTP headers, never from the body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// Server-side processing time; zero when the header is absent.
    pub processing_time: Duration,
    pub organization: Option<String>,
    pub request_id: Option<String>,
    pub openai_version: Option<String>,
    pub rate_limits: RateLimits,
}

impl ResponseMetadata {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let processing_time = header_str(headers, PROCESSING_TIME_HEADER)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
            .unwrap_or_default();
        let number = |name: &str| header_str(headers, name).and_then(|v| v.parse::<u64>().ok());
        let reset = |name: &str| header_str(headers, name).and_then(parse_go_duration);

        Self {
            processing_time,
            organization: header_str(headers, ORGANIZATION_HEADER).map(str::to_string),
            request_id: request_id_from_headers(headers),
            openai_version: header_str(headers, VERSION_HEADER).map(str::to_string),
            rate_limits: RateLimits {
                limit_requests: number("x-ratelimit-limit-requests"),
                limit_tokens: number("x-ratelimit-limit-tokens"),
                remaining_requests: number("x-ratelimit-remaining-requests"),
                remaining_tokens: number("x-ratelimit-remaining-tokens"),
                reset_requests: reset("x-ratelimit-reset-requests"),
                reset_tokens: reset("x-ratelimit-reset-tokens"),
            },
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    header_str(headers, REQUEST_ID_HEADER)
        .or_else(|| header_str(headers, "apim-request-id"))
        .map(str::to_string)
}

/// Parse durations in the `1h2m3.5s` / `20ms` form used by rate-limit reset headers.
pub fn parse_go_duration(raw: &str) -> Option<Duration> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total = 0f64;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return None,
        };
        total += value * seconds_per_unit;
        rest = &rest[unit_len..];
    }
    Some(Duration::from_secs_f64(total))
}

/// Build a [`RequestFailed`] from a non-success response.
///
/// Understands the `{"error": {"message", "type", "param", "code"}}` envelope
/// and falls back to the raw body or the status reason.
pub(crate) fn parse_request_failed(
    status: StatusCode,
    headers: &HeaderMap,
    body: String,
    request_body: Option<String>,
) -> RequestFailed {
    let status_text = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let mut failed = RequestFailed::new(status.as_u16(), status_text);
    failed.request_id = request_id_from_headers(headers);
    failed.request_body = request_body;

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        let envelope = value.get("error").filter(|v| v.is_object()).unwrap_or(&value);
        let text = |key: &str| {
            envelope.get(key).and_then(|v| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        if let Some(message) = text("message") {
            failed.message = message;
        }
        failed.code = text("code");
        failed.error_type = text("type");
        failed.param = text("param");
    } else if !body.trim().is_empty() {
        failed.message = body.trim().to_string();
    }

    failed.body = body;
    failed
}
