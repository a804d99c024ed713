//! Structured access logging.
//!
//! Records exactly one [`AccessRecord`] per request once the inner service
//! has produced its response. A record carries the status, method, path,
//! matched route (from axum's [`MatchedPath`]), duration, and any attributes
//! contributed by [`ContextExtractor`]s.
//!
//! Records are handed to an [`AccessLogSink`]. The default [`TracingSink`]
//! emits a `tracing` event with target `access_log`:
//!
//! ```text
//! INFO access_log: GET /users/42 [200] http.status_code=200 http.method=GET
//!     http.path=/users/42 http.route=/users/{id} duration=1.2ms attrs=""
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = AccessLogConfig::default()
//!     .with_path_filter(["/health"])
//!     .with_extractor(header_extractor([USER_AGENT], HeaderExtractorOptions::default()));
//!
//! let app = Router::new()
//!     .route("/users/{id}", get(handler))
//!     .layer(DeadlineLayer::new(deadline_config))
//!     .layer(AccessLogLayer::new(config));
//! ```
//!
//! Place the access log outside the deadline layer so that the recorded
//! status and duration reflect requests cut short by their deadline.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::MatchedPath;
use axum::http::request::Parts;
use axum::http::{Request, Response, StatusCode};
use serde::Serialize;
use tower::{Layer, Service};
use tracing::Level;

use crate::metrics;

/// Log target used by [`TracingSink`].
pub const ACCESS_LOG_TARGET: &str = "access_log";

/// Route label for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

/// A single key/value attribute attached to an access record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogAttr {
    pub key: String,
    pub value: String,
}

impl LogAttr {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Pulls extra attributes out of an inbound request.
///
/// Extractors run before the request is handed to the inner service, so they
/// see the request as it arrived at the access log layer.
pub type ContextExtractor = Arc<dyn Fn(&Parts) -> Vec<LogAttr> + Send + Sync>;

/// Chooses the log level for a response status.
pub type Leveler = Arc<dyn Fn(StatusCode) -> Level + Send + Sync>;

/// `ERROR` for server errors (5xx), `INFO` for everything else.
pub fn default_leveler(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else {
        Level::INFO
    }
}

/// One access log entry.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    /// `"{METHOD} {path} [{status}]"`
    pub message: String,
    pub status: u16,
    pub method: String,
    pub path: String,
    pub route: Option<String>,
    pub duration: Duration,
    pub attrs: Vec<LogAttr>,
}

/// Destination for access records.
pub trait AccessLogSink: Send + Sync + 'static {
    fn record(&self, level: Level, record: &AccessRecord);
}

/// Sink that emits each record as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AccessLogSink for TracingSink {
    fn record(&self, level: Level, record: &AccessRecord) {
        let attrs = format_attrs(&record.attrs);
        // unmatched requests carry no route field
        let route = record.route.as_deref();

        // `event!` needs the level as a constant
        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    target: ACCESS_LOG_TARGET,
                    $level,
                    http.status_code = record.status,
                    http.method = %record.method,
                    http.path = %record.path,
                    http.route = route,
                    duration = ?record.duration,
                    attrs = %attrs,
                    "{}",
                    record.message
                )
            };
        }

        if level == Level::ERROR {
            emit!(Level::ERROR);
        } else if level == Level::WARN {
            emit!(Level::WARN);
        } else if level == Level::INFO {
            emit!(Level::INFO);
        } else if level == Level::DEBUG {
            emit!(Level::DEBUG);
        } else {
            emit!(Level::TRACE);
        }
    }
}

fn format_attrs(attrs: &[LogAttr]) -> String {
    attrs
        .iter()
        .map(|attr| format!("{}={}", attr.key, attr.value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Access log settings.
///
/// Everything is explicit: the sink defaults to [`TracingSink`] and the
/// leveler to [`default_leveler`].
#[derive(Clone)]
pub struct AccessLogConfig {
    sink: Arc<dyn AccessLogSink>,
    leveler: Leveler,
    filtered_paths: HashSet<String>,
    filtered_routes: HashSet<String>,
    extractors: Vec<ContextExtractor>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            sink: Arc::new(TracingSink),
            leveler: Arc::new(default_leveler),
            filtered_paths: HashSet::new(),
            filtered_routes: HashSet::new(),
            extractors: Vec::new(),
        }
    }
}

impl fmt::Debug for AccessLogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLogConfig")
            .field("filtered_paths", &self.filtered_paths)
            .field("filtered_routes", &self.filtered_routes)
            .field("extractors", &self.extractors.len())
            .finish_non_exhaustive()
    }
}

impl AccessLogConfig {
    /// Send records to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: impl AccessLogSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Replace the status-to-level policy.
    pub fn with_leveler<F>(mut self, leveler: F) -> Self
    where
        F: Fn(StatusCode) -> Level + Send + Sync + 'static,
    {
        self.leveler = Arc::new(leveler);
        self
    }

    /// Skip records for these exact request paths (e.g. health checks).
    pub fn with_path_filter<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.filtered_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Skip records for these matched route patterns, e.g. `/users/{id}`.
    pub fn with_route_filter<I, R>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.filtered_routes.extend(routes.into_iter().map(Into::into));
        self
    }

    /// Add an attribute extractor.
    pub fn with_extractor(mut self, extractor: ContextExtractor) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Add several attribute extractors.
    pub fn with_extractors(mut self, extractors: impl IntoIterator<Item = ContextExtractor>) -> Self {
        self.extractors.extend(extractors);
        self
    }

    fn is_filtered(&self, path: &str, route: Option<&str>) -> bool {
        self.filtered_paths.contains(path)
            || route.is_some_and(|route| self.filtered_routes.contains(route))
    }
}

/// Access log layer for Tower middleware stack.
#[derive(Debug, Clone, Default)]
pub struct AccessLogLayer {
    config: Arc<AccessLogConfig>,
}

impl AccessLogLayer {
    /// Create a new access log layer.
    pub fn new(config: AccessLogConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Access log service wrapper.
#[derive(Debug, Clone)]
pub struct AccessLogService<S> {
    inner: S,
    config: Arc<AccessLogConfig>,
}

/// Request details captured before the inner service runs.
struct PendingRecord {
    start: Instant,
    method: String,
    path: String,
    route: Option<String>,
    attrs: Vec<LogAttr>,
}

impl PendingRecord {
    fn finish(self, config: &AccessLogConfig, status: StatusCode) {
        let duration = self.start.elapsed();
        let status_code = status.as_u16();

        metrics::record_request(
            self.route.as_deref().unwrap_or(UNMATCHED_ROUTE),
            &self.method,
            status_code,
            duration.as_secs_f64(),
        );

        let record = AccessRecord {
            message: format!("{} {} [{}]", self.method, self.path, status_code),
            status: status_code,
            method: self.method,
            path: self.path,
            route: self.route,
            duration,
            attrs: self.attrs,
        };
        config.sink.record((config.leveler)(status), &record);
    }
}

impl<S, B, ResBody> Service<Request<B>> for AccessLogService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let start = Instant::now();
        let config = self.config.clone();

        let path = req.uri().path().to_string();
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string());

        let (req, pending) = if config.is_filtered(&path, route.as_deref()) {
            (req, None)
        } else {
            let (parts, body) = req.into_parts();
            let attrs = config
                .extractors
                .iter()
                .flat_map(|extract| extract(&parts))
                .collect();
            let pending = PendingRecord {
                start,
                method: parts.method.to_string(),
                path,
                route,
                attrs,
            };
            (Request::from_parts(parts, body), Some(pending))
        };

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let result = inner.call(req).await;

            if let Some(pending) = pending {
                let status = match &result {
                    Ok(response) => response.status(),
                    Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                pending.finish(&config, status);
            }

            result
        })
    }
}
