//! Outbound deadline propagation.
//!
//! Wraps an HTTP transport (any `tower::Service<Request<B>>`: a hyper-util
//! client, an in-process axum `Router`, a test `service_fn`) and advertises the
//! caller's deadline to the remote peer in the deadline header.
//!
//! The advertised deadline is the caller's [`RequestContext`] deadline, or
//! `now + default_timeout` when the context has none, clamped to
//! `now + max_timeout`. With neither, the request is sent unmodified.
//!
//! # Usage
//!
//! ```rust,ignore
//! let client = ServiceBuilder::new()
//!     .layer(DeadlineClientLayer::new(config))
//!     .service(transport);
//!
//! // Forward the inbound request's context so its deadline travels on
//! let req = Request::get(url).body(body)?.with_context(ctx);
//! let response = client.oneshot(req).await?;
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::Request;
use chrono::Utc;
use tower::{Layer, Service};
use tracing::debug;

use super::deadline::{DeadlineConfig, format_deadline};
use crate::context::RequestContext;
use crate::metrics::{self, stage};

/// Deadline layer for the client side of a Tower middleware stack.
#[derive(Debug, Clone, Default)]
pub struct DeadlineClientLayer {
    config: Arc<DeadlineConfig>,
}

impl DeadlineClientLayer {
    /// Create a new client deadline layer.
    pub fn new(config: DeadlineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for DeadlineClientLayer {
    type Service = DeadlineClientService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineClientService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Client deadline service wrapper.
#[derive(Debug, Clone)]
pub struct DeadlineClientService<S> {
    inner: S,
    config: Arc<DeadlineConfig>,
}

impl<S, B> Service<Request<B>> for DeadlineClientService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let ctx = req.extensions().get::<RequestContext>().cloned();
        if let Some(resolution) = self
            .config
            .decorate(req.headers_mut(), ctx.as_ref(), Utc::now())
        {
            debug!(
                header = %self.config.header_name(),
                deadline = %format_deadline(resolution.deadline),
                source = resolution.source.as_str(),
                clamped = resolution.clamped,
                "Propagating deadline to outbound request"
            );
            metrics::record_deadline_resolved(
                stage::CLIENT,
                resolution.source.as_str(),
                resolution.clamped,
            );
        }

        self.inner.call(req)
    }
}
