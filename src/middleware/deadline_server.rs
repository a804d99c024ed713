//! Inbound deadline middleware.
//!
//! Installs a deadline on each request's [`RequestContext`] before the request
//! reaches the handler. The deadline comes from, in priority order:
//!
//! 1. A deadline already on the request's context (left untouched)
//! 2. The inbound deadline header (e.g. `Deadline: 2030-01-01T00:00:00Z`)
//! 3. `now + default_timeout`
//!
//! A deadline from (2) or (3) is clamped to `now + max_timeout`. When nothing
//! resolves, the request passes through unmodified.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = DeadlineConfig::builder()
//!     .default_timeout(Duration::from_secs(5))
//!     .max_timeout(Duration::from_secs(30))
//!     .build()?;
//!
//! let app = Router::new()
//!     .route("/work", get(handler))
//!     .layer(DeadlineLayer::new(config));
//! ```
//!
//! Handlers observe the deadline through the [`RequestContext`] extractor.
//! The context is cancelled when the deadline passes, or when the response
//! future completes or is dropped, whichever happens first.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::Request;
use chrono::Utc;
use tower::{Layer, Service};
use tracing::debug;

use super::deadline::{DeadlineConfig, format_deadline};
use crate::context::{CancelGuard, RequestContext};
use crate::metrics::{self, stage};

/// Deadline layer for the server side of a Tower middleware stack.
#[derive(Debug, Clone, Default)]
pub struct DeadlineLayer {
    config: Arc<DeadlineConfig>,
    root: Option<RequestContext>,
}

impl DeadlineLayer {
    /// Create a new deadline layer.
    pub fn new(config: DeadlineConfig) -> Self {
        Self {
            config: Arc::new(config),
            root: None,
        }
    }

    /// Parent context for requests that arrive without one.
    ///
    /// Deadline-bound contexts are derived from `root`, so cancelling it
    /// (e.g. on shutdown) reaches every request that got a deadline here.
    pub fn with_root(mut self, root: RequestContext) -> Self {
        self.root = Some(root);
        self
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            config: self.config.clone(),
            root: self.root.clone(),
        }
    }
}

/// Deadline service wrapper.
#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    config: Arc<DeadlineConfig>,
    root: Option<RequestContext>,
}

impl<S> DeadlineService<S> {
    /// Resolve and install the deadline, returning the guard that owns it.
    fn install<B>(&self, req: &mut Request<B>) -> Option<CancelGuard> {
        let existing = req.extensions().get::<RequestContext>().cloned();
        if let Some(ctx) = &existing
            && let Some(deadline) = ctx.deadline()
        {
            debug!(deadline = %format_deadline(deadline), "Request already carries a deadline");
            metrics::record_deadline_preserved();
            return None;
        }

        let resolution = self.config.resolve_inbound(req.headers(), Utc::now())?;
        debug!(
            deadline = %format_deadline(resolution.deadline),
            source = resolution.source.as_str(),
            clamped = resolution.clamped,
            "Installing request deadline"
        );
        metrics::record_deadline_resolved(
            stage::SERVER,
            resolution.source.as_str(),
            resolution.clamped,
        );

        let parent = existing
            .or_else(|| self.root.clone())
            .unwrap_or_default();
        let (ctx, guard) = parent.with_deadline(resolution.deadline);
        req.extensions_mut().insert(ctx);
        Some(guard)
    }
}

impl<S, B> Service<Request<B>> for DeadlineService<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let guard = self.install(&mut req);

        // Call the service that was driven to readiness, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let _guard = guard;
            inner.call(req).await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Response, StatusCode};
    use chrono::{DateTime, TimeDelta, TimeZone};
    use tokio_util::sync::CancellationToken;
    use tower::{ServiceExt, service_fn};

    use crate::context::RequestContextExt;

    /// Wrap a handler that records the context it was given.
    async fn serve(
        layer: DeadlineLayer,
        req: Request<Body>,
    ) -> (Response<Body>, Option<RequestContext>) {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let handler = service_fn(move |req: Request<Body>| {
            let seen = seen_clone.clone();
            async move {
                *seen.lock().unwrap() = req.extensions().get::<RequestContext>().cloned();
                Ok::<_, Infallible>(
                    Response::builder()
                        .status(StatusCode::NO_CONTENT)
                        .body(Body::empty())
                        .unwrap(),
                )
            }
        });

        let response = layer.layer(handler).oneshot(req).await.unwrap();
        let ctx = seen.lock().unwrap().take();
        (response, ctx)
    }

    fn request() -> axum::http::request::Builder {
        Request::builder().uri("/")
    }

    fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
        let delta = (actual - expected).num_milliseconds().abs();
        assert!(delta <= 5, "got {actual}, want ~{expected} (off by {delta}ms)");
    }

    #[tokio::test]
    async fn test_propagates_header_deadline() {
        let deadline = Utc::now() + TimeDelta::seconds(5);
        let config = DeadlineConfig::builder()
            .header_name("X-Stop-At")
            .build()
            .unwrap();
        let req = request()
            .header("X-Stop-At", format_deadline(deadline))
            .body(Body::empty())
            .unwrap();

        let (response, ctx) = serve(DeadlineLayer::new(config), req).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(ctx.expect("context installed").deadline(), Some(deadline));
    }

    #[tokio::test]
    async fn test_fixed_header_value_installed_exactly() {
        let req = request()
            .header("Deadline", "2030-01-01T00:00:00Z")
            .body(Body::empty())
            .unwrap();

        let (_, ctx) = serve(DeadlineLayer::default(), req).await;

        assert_eq!(
            ctx.unwrap().deadline(),
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_default_timeout() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        let expected = Utc::now() + TimeDelta::seconds(3);

        let (_, ctx) = serve(DeadlineLayer::new(config), request().body(Body::empty()).unwrap()).await;

        assert_close(ctx.unwrap().deadline().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_max_timeout_clamps_header() {
        let config = DeadlineConfig::builder()
            .max_timeout(Duration::from_secs(3))
            .build()
            .unwrap();
        let requested = Utc::now() + TimeDelta::seconds(10);
        let req = request()
            .header("Deadline", format_deadline(requested))
            .body(Body::empty())
            .unwrap();
        let expected = Utc::now() + TimeDelta::seconds(3);

        let (_, ctx) = serve(DeadlineLayer::new(config), req).await;

        assert_close(ctx.unwrap().deadline().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_max_timeout_clamps_default() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(3))
            .max_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let expected = Utc::now() + TimeDelta::seconds(1);

        let (_, ctx) = serve(DeadlineLayer::new(config), request().body(Body::empty()).unwrap()).await;

        assert_close(ctx.unwrap().deadline().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_no_sources_passes_through() {
        let (response, ctx) =
            serve(DeadlineLayer::default(), request().body(Body::empty()).unwrap()).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(ctx.is_none());
    }

    #[tokio::test]
    async fn test_malformed_header_falls_through_to_default() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let req = request()
            .header("Deadline", "2030-01-01 00:00:00")
            .body(Body::empty())
            .unwrap();
        let expected = Utc::now() + TimeDelta::seconds(2);

        let (_, ctx) = serve(DeadlineLayer::new(config), req).await;

        assert_close(ctx.unwrap().deadline().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_malformed_header_without_default_is_ignored() {
        let req = request()
            .header("Deadline", "not a timestamp")
            .body(Body::empty())
            .unwrap();

        let (response, ctx) = serve(DeadlineLayer::default(), req).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(ctx.is_none());
    }

    #[tokio::test]
    async fn test_existing_deadline_untouched() {
        let existing = Utc::now() + TimeDelta::seconds(60);
        let (outer, _guard) = RequestContext::background().with_deadline(existing);
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(1))
            .max_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let req = request()
            .header("Deadline", format_deadline(Utc::now() + TimeDelta::seconds(1)))
            .body(Body::empty())
            .unwrap()
            .with_context(outer);

        let (_, ctx) = serve(DeadlineLayer::new(config), req).await;

        assert_eq!(ctx.unwrap().deadline(), Some(existing));
    }

    #[tokio::test]
    async fn test_context_without_deadline_becomes_parent() {
        let token = CancellationToken::new();
        let req = request()
            .body(Body::empty())
            .unwrap()
            .with_context(RequestContext::from_token(token.clone()));
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let handler = service_fn(move |req: Request<Body>| {
            let seen = seen_clone.clone();
            let token = token.clone();
            async move {
                let ctx = req.context();
                token.cancel();
                *seen.lock().unwrap() = Some(ctx.is_cancelled());
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }
        });

        DeadlineLayer::new(config)
            .layer(handler)
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_root_context_is_parent() {
        let shutdown = CancellationToken::new();
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let layer = DeadlineLayer::new(config).with_root(RequestContext::from_token(shutdown.clone()));

        let (_, ctx) = serve(layer, request().body(Body::empty()).unwrap()).await;
        let ctx = ctx.unwrap();

        // Completion already cancelled the request context; the root is unaffected
        assert!(ctx.is_cancelled());
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_context_cancelled_after_response() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        let (_, ctx) = serve(DeadlineLayer::new(config), request().body(Body::empty()).unwrap()).await;
        let ctx = ctx.unwrap();

        assert!(ctx.is_cancelled());
        assert_eq!(ctx.err(), Some(crate::context::ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_context_cancelled_when_handler_fails() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let handler = service_fn(move |req: Request<Body>| {
            let seen = seen_clone.clone();
            async move {
                *seen.lock().unwrap() = Some(req.context());
                Err::<Response<Body>, _>("downstream failed")
            }
        });

        let result = DeadlineLayer::new(config)
            .layer(handler)
            .oneshot(request().body(Body::empty()).unwrap())
            .await;

        assert_eq!(result.unwrap_err(), "downstream failed");
        assert!(seen.lock().unwrap().take().unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn test_context_cancelled_when_response_future_dropped() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let handler = service_fn(move |req: Request<Body>| {
            let seen = seen_clone.clone();
            async move {
                *seen.lock().unwrap() = Some(req.context());
                std::future::pending::<Result<Response<Body>, Infallible>>().await
            }
        });

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            DeadlineLayer::new(config)
                .layer(handler)
                .oneshot(request().body(Body::empty()).unwrap()),
        )
        .await;

        assert!(outcome.is_err());
        let ctx = seen.lock().unwrap().take().expect("handler ran");
        assert!(ctx.is_cancelled());
        assert!(ctx.deadline().is_some());
    }

    #[tokio::test]
    async fn test_context_cancelled_when_handler_panics() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let handler = service_fn(move |req: Request<Body>| {
            let seen = seen_clone.clone();
            async move {
                *seen.lock().unwrap() = Some(req.context());
                if req.uri().path() == "/" {
                    panic!("handler blew up");
                }
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }
        });

        let joined = tokio::spawn(
            DeadlineLayer::new(config)
                .layer(handler)
                .oneshot(request().body(Body::empty()).unwrap()),
        )
        .await;

        assert!(joined.unwrap_err().is_panic());
        let ctx = seen.lock().unwrap().take().expect("handler ran");
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_fires_during_handling() {
        let config = DeadlineConfig::builder()
            .default_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let handler = service_fn(|req: Request<Body>| async move {
            let ctx = req.context();
            let outcome = ctx.run(tokio::time::sleep(Duration::from_secs(5))).await;
            let status = match outcome {
                Ok(()) => StatusCode::OK,
                Err(_) => StatusCode::GATEWAY_TIMEOUT,
            };
            Ok::<_, Infallible>(Response::builder().status(status).body(Body::empty()).unwrap())
        });

        let response = DeadlineLayer::new(config)
            .layer(handler)
            .oneshot(request().body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
