use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::errors::Error;

/// User-provided callbacks for emitting metrics without taking on a tracing dependency.
#[derive(Clone, Default)]
pub struct MetricsCallbacks {
    pub http_request: Option<Arc<dyn Fn(HttpRequestMetrics) + Send + Sync>>,
    pub stream_first_event: Option<Arc<dyn Fn(StreamFirstEventMetrics) + Send + Sync>>,
}

impl fmt::Debug for MetricsCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCallbacks")
            .field(
                "http_request",
                &self.http_request.as_ref().map(|_| "callback"),
            )
            .field(
                "stream_first_event",
                &self.stream_first_event.as_ref().map(|_| "callback"),
            )
            .finish()
    }
}

/// Common request metadata shared by all telemetry events.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub method: String,
    pub resource: String,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            resource: resource.into(),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if let Some(id) = request_id {
            if !id.trim().is_empty() {
                self.request_id = Some(id);
            }
        }
        self
    }
}

/// HTTP request latency and outcome.
#[derive(Clone, Debug)]
pub struct HttpRequestMetrics {
    pub latency: Duration,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub context: RequestContext,
}

/// Time from request start to the first decoded stream record.
#[derive(Clone, Debug)]
pub struct StreamFirstEventMetrics {
    pub latency: Duration,
    pub error: Option<String>,
    pub context: RequestContext,
}

/// Internal helper that owns the registered callbacks (if any).
#[derive(Clone, Default)]
pub(crate) struct Telemetry {
    callbacks: MetricsCallbacks,
}

impl Telemetry {
    pub fn new(callbacks: Option<MetricsCallbacks>) -> Self {
        Self {
            callbacks: callbacks.unwrap_or_default(),
        }
    }

    pub fn http_enabled(&self) -> bool {
        self.callbacks.http_request.is_some()
    }

    pub fn stream_enabled(&self) -> bool {
        self.callbacks.stream_first_event.is_some()
    }

    pub fn record_http(&self, metrics: HttpRequestMetrics) {
        if let Some(cb) = &self.callbacks.http_request {
            cb(metrics);
        }
    }

    fn record_first_event(&self, metrics: StreamFirstEventMetrics) {
        if let Some(cb) = &self.callbacks.stream_first_event {
            cb(metrics);
        }
    }

    pub fn stream_state(&self, context: RequestContext, start: Instant) -> Option<StreamTelemetry> {
        if self.stream_enabled() {
            return Some(StreamTelemetry::new(self.clone(), context, start));
        }
        None
    }
}

/// First-event bookkeeping for one streaming call.
#[derive(Clone)]
pub(crate) struct StreamTelemetry {
    inner: Arc<StreamTelemetryInner>,
}

struct StreamTelemetryInner {
    telemetry: Telemetry,
    context: RequestContext,
    start: Instant,
    first_event_recorded: AtomicBool,
}

impl StreamTelemetry {
    pub fn new(telemetry: Telemetry, context: RequestContext, start: Instant) -> Self {
        Self {
            inner: Arc::new(StreamTelemetryInner {
                telemetry,
                context,
                start,
                first_event_recorded: AtomicBool::new(false),
            }),
        }
    }

    pub fn on_event(&self) {
        self.record_first_event(None);
    }

    pub fn on_error(&self, error: &Error) {
        self.record_first_event(Some(error.to_string()));
    }

    pub fn on_closed(&self) {
        self.record_first_event(Some("stream closed".to_string()));
    }

    fn record_first_event(&self, error: Option<String>) {
        if self.inner.first_event_recorded.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .telemetry
            .record_first_event(StreamFirstEventMetrics {
                latency: self.inner.start.elapsed(),
                error,
                context: self.inner.context.clone(),
            });
    }
}
