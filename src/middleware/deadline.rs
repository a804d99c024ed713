//! Deadline configuration, wire format, and resolution rules.
//!
//! Both the server stage ([`DeadlineLayer`](super::DeadlineLayer)) and the
//! client stage ([`DeadlineClientLayer`](super::DeadlineClientLayer)) share a
//! [`DeadlineConfig`] and the timestamp format defined here.
//!
//! # Wire Format
//!
//! The deadline travels as an absolute RFC 3339 timestamp:
//!
//! ```text
//! Deadline: 2024-01-15T10:30:00.123456789Z
//! ```
//!
//! Outbound values always carry nine fractional digits and a `Z` offset.
//! Inbound values must use an uppercase `T` separator and an explicit offset
//! (`Z` or `±hh:mm`); the fractional part may be omitted or shorter. Anything
//! else is treated as if the header were absent.
//!
//! # Resolution
//!
//! | Stage  | First choice        | Fallback              | Then                      |
//! |--------|---------------------|-----------------------|---------------------------|
//! | server | inbound header      | `now + default`       | clamp to `now + max`      |
//! | client | context deadline    | `now + default`       | clamp to `now + max`      |
//!
//! A zero `default_timeout` or `max_timeout` means "not configured".

use std::time::Duration;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, SecondsFormat, TimeDelta, Timelike, Utc};

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};

/// Default header carrying the deadline timestamp.
pub const DEFAULT_HEADER_NAME: &str = "Deadline";

/// Where a resolved deadline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineSource {
    /// Parsed from the inbound deadline header.
    Header,
    /// Taken from the caller's request context.
    Context,
    /// Computed from the configured default timeout.
    Default,
}

impl DeadlineSource {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadlineSource::Header => "header",
            DeadlineSource::Context => "context",
            DeadlineSource::Default => "default",
        }
    }
}

/// The effective deadline chosen for one request or call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub deadline: DateTime<Utc>,
    pub source: DeadlineSource,
    /// Whether `max_timeout` shortened the candidate.
    pub clamped: bool,
}

/// Shared, read-only deadline settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use edge_middleware::DeadlineConfig;
///
/// let config = DeadlineConfig::builder()
///     .header_name("X-Stop-At")
///     .default_timeout(Duration::from_secs(3))
///     .max_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.header_name().as_str(), "x-stop-at");
/// ```
#[derive(Debug, Clone)]
pub struct DeadlineConfig {
    header_name: HeaderName,
    default_timeout: Option<Duration>,
    max_timeout: Option<Duration>,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            header_name: HeaderName::from_static("deadline"),
            default_timeout: None,
            max_timeout: None,
        }
    }
}

impl DeadlineConfig {
    /// Start building a configuration from defaults.
    pub fn builder() -> DeadlineConfigBuilder {
        DeadlineConfigBuilder::default()
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn max_timeout(&self) -> Option<Duration> {
        self.max_timeout
    }

    /// Resolve the deadline for an inbound request from its headers.
    ///
    /// The caller is responsible for skipping resolution when the request's
    /// context already has a deadline.
    pub fn resolve_inbound(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Option<Resolution> {
        let from_header = headers
            .get(&self.header_name)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_deadline)
            .map(|deadline| (deadline, DeadlineSource::Header));

        let (deadline, source) = from_header.or_else(|| self.default_candidate(now))?;
        Some(self.clamp(deadline, source, now))
    }

    /// Resolve the deadline to advertise on an outbound call.
    pub fn resolve_outbound(
        &self,
        context_deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Resolution> {
        let (deadline, source) = context_deadline
            .map(|deadline| (deadline, DeadlineSource::Context))
            .or_else(|| self.default_candidate(now))?;
        Some(self.clamp(deadline, source, now))
    }

    /// Write the outbound deadline header, replacing any existing value.
    ///
    /// Leaves `headers` untouched when no deadline resolves.
    pub fn decorate(
        &self,
        headers: &mut HeaderMap,
        context: Option<&RequestContext>,
        now: DateTime<Utc>,
    ) -> Option<Resolution> {
        let resolution = self.resolve_outbound(context.and_then(RequestContext::deadline), now)?;
        let value = HeaderValue::from_str(&format_deadline(resolution.deadline)).ok()?;
        headers.insert(self.header_name.clone(), value);
        Some(resolution)
    }

    fn default_candidate(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DeadlineSource)> {
        self.default_timeout
            .and_then(|timeout| offset(now, timeout))
            .map(|deadline| (deadline, DeadlineSource::Default))
    }

    fn clamp(&self, deadline: DateTime<Utc>, source: DeadlineSource, now: DateTime<Utc>) -> Resolution {
        match self.max_timeout.and_then(|max| offset(now, max)) {
            Some(max_deadline) if deadline > max_deadline => Resolution {
                deadline: max_deadline,
                source,
                clamped: true,
            },
            _ => Resolution {
                deadline,
                source,
                clamped: false,
            },
        }
    }
}

/// Builder for [`DeadlineConfig`].
#[derive(Debug, Clone, Default)]
pub struct DeadlineConfigBuilder {
    header_name: Option<String>,
    default_timeout: Option<Duration>,
    max_timeout: Option<Duration>,
}

impl DeadlineConfigBuilder {
    /// Header carrying the deadline. Empty means [`DEFAULT_HEADER_NAME`].
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = Some(name.into());
        self
    }

    /// Timeout applied when no other deadline is found. Zero disables it.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Upper bound on any resolved deadline, measured from resolution time.
    /// Zero disables it.
    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = Some(timeout);
        self
    }

    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the header name is not a valid
    /// HTTP header token.
    pub fn build(self) -> AppResult<DeadlineConfig> {
        let name = self
            .header_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_HEADER_NAME);

        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            AppError::ConfigError(format!("Invalid deadline header name {name:?}: {e}"))
        })?;

        Ok(DeadlineConfig {
            header_name,
            default_timeout: self.default_timeout.filter(|t| !t.is_zero()),
            max_timeout: self.max_timeout.filter(|t| !t.is_zero()),
        })
    }
}

/// Format a deadline for the wire: RFC 3339, nanoseconds, `Z` offset.
pub fn format_deadline(deadline: DateTime<Utc>) -> String {
    deadline.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a deadline header value.
///
/// Returns `None` for anything outside the accepted RFC 3339 profile.
pub fn parse_deadline(value: &str) -> Option<DateTime<Utc>> {
    // chrono also accepts a space or lowercase separators
    if value.as_bytes().get(10) != Some(&b'T') || value.ends_with('z') {
        return None;
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        // chrono encodes a leap second (`:60`) as nanos >= 1e9
        .filter(|deadline| deadline.nanosecond() < 1_000_000_000)
        .map(|deadline| deadline.with_timezone(&Utc))
}

/// `now + timeout`, or `None` if it does not fit in a timestamp.
fn offset(now: DateTime<Utc>, timeout: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}
