//! HTTP middleware for deadline propagation and access logging.
//!
//! - **Deadline (server)**: Installs a per-request deadline on the request context
//! - **Deadline (client)**: Advertises the caller's deadline on outbound requests
//! - **Access Log**: One structured record per request with pluggable attributes
//!
//! # Architecture
//!
//! ```text
//!                 inbound                                     outbound
//! Request → Access Log → Deadline → Handler ── ctx ──▶ Deadline Client → Transport
//!              ↓            ↓                              ↓
//!          log record   RequestContext                 Deadline header
//! ```
//!
//! The server and client stages share one [`DeadlineConfig`] and one wire
//! format, so a deadline sent by a client stage is read back exactly by the
//! server stage on the next hop.

pub mod access_log;
pub mod deadline;
pub mod deadline_client;
pub mod deadline_server;
pub mod extractors;

pub use access_log::{
    AccessLogConfig, AccessLogLayer, AccessLogService, AccessLogSink, AccessRecord,
    ContextExtractor, Leveler, LogAttr, TracingSink, default_leveler,
};
pub use deadline::{
    DEFAULT_HEADER_NAME, DeadlineConfig, DeadlineConfigBuilder, DeadlineSource, Resolution,
    format_deadline, parse_deadline,
};
pub use deadline_client::{DeadlineClientLayer, DeadlineClientService};
pub use deadline_server::{DeadlineLayer, DeadlineService};
pub use extractors::{
    DeadlineExtractorOptions, HeaderExtractorOptions, deadline_extractor, header_extractor,
};
