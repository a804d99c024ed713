//! # Edge Middleware
//!
//! Composable Axum/Tower middleware for the edges of an HTTP service:
//!
//! - **Deadline propagation (server)**: Derives a per-request deadline from an
//!   inbound header or a configured default, clamps it to a maximum, and
//!   installs it on a cancellable [`RequestContext`]
//! - **Deadline propagation (client)**: Advertises the caller's deadline to
//!   downstream services in the same header format
//! - **Access logging**: One structured record per request with status, route,
//!   duration, and pluggable attributes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AccessLogLayer → DeadlineLayer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (RequestContext extractor, ctx.run(..))           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DeadlineClientLayer → HTTP transport                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use axum::{Router, routing::get};
//! use edge_middleware::{AccessLogConfig, AccessLogLayer, DeadlineConfig, DeadlineLayer};
//!
//! # fn main() -> edge_middleware::AppResult<()> {
//! let deadline = DeadlineConfig::builder()
//!     .default_timeout(Duration::from_secs(5))
//!     .max_timeout(Duration::from_secs(30))
//!     .build()?;
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(DeadlineLayer::new(deadline))
//!     .layer(AccessLogLayer::new(AccessLogConfig::default()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Wire Format
//!
//! ```bash
//! curl -H "Deadline: 2030-01-01T00:00:00.000000000Z" http://localhost:3000/deadline
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use context::{CancelGuard, ContextError, RequestContext, RequestContextExt};
pub use error::{AppError, AppResult};
pub use middleware::{
    AccessLogConfig, AccessLogLayer, DeadlineClientLayer, DeadlineConfig, DeadlineLayer,
};
pub use routes::build_router;
