//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (applied in order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Trace Span     │ ← Request span for everything below
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Access Log     │ ← One record per request (skips /health)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │    Deadline      │ ← Installs RequestContext deadline
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! The access log wraps the deadline layer so that status and duration
//! reflect requests cut short by their deadline.

use axum::Router;
use axum::routing::get;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{Level, info};

use crate::config::Config;
use crate::context::RequestContext;
use crate::handlers;
use crate::middleware::{
    AccessLogLayer, DeadlineExtractorOptions, DeadlineLayer, deadline_extractor,
};

/// Build the application router with all routes and middleware configured.
///
/// # Arguments
///
/// * `config` - Application configuration
/// * `root` - Parent context for request deadlines; cancel it to abort
///   in-flight deadline-bound work (e.g. on shutdown)
pub fn build_router(config: &Config, root: RequestContext) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/deadline", get(handlers::deadline_info))
        .route("/work", get(handlers::work));

    info!(
        header = %config.deadline.header_name(),
        default_timeout = ?config.deadline.default_timeout(),
        max_timeout = ?config.deadline.max_timeout(),
        "Deadline propagation configured"
    );
    let deadline = DeadlineLayer::new(config.deadline.clone()).with_root(root);

    let access_log = config.access_log_config().with_extractor(deadline_extractor(
        &config.deadline,
        DeadlineExtractorOptions::default(),
    ));
    info!(
        skip_paths = ?config.access_log_skip_paths,
        skip_routes = ?config.access_log_skip_routes,
        "Access logging configured"
    );

    // Spans only; the access log emits the per-request record
    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(())
        .on_response(())
        .on_failure(());

    router
        .layer(deadline)
        .layer(AccessLogLayer::new(access_log))
        .layer(trace)
}
