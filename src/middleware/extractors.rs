//! Ready-made [`ContextExtractor`]s for the access log.
//!
//! Each extractor takes an options struct whose fields are all optional:
//! `group` prefixes every key (`group.key`), and key overrides replace the
//! default attribute names.

use std::sync::Arc;

use axum::http::HeaderName;
use axum::http::request::Parts;
use chrono::Utc;

use super::access_log::{ContextExtractor, LogAttr};
use super::deadline::{DeadlineConfig, format_deadline, parse_deadline};
use crate::context::RequestContext;

/// Options for [`header_extractor`].
#[derive(Debug, Clone, Default)]
pub struct HeaderExtractorOptions {
    /// Prefix for every key. Empty means no prefix.
    pub group: Option<String>,
}

/// Options for [`deadline_extractor`].
#[derive(Debug, Clone, Default)]
pub struct DeadlineExtractorOptions {
    /// Prefix for every key. Empty means no prefix.
    pub group: Option<String>,

    /// Defaults to `"deadline"`.
    pub deadline_key: Option<String>,

    /// Defaults to `"deadline_remaining_ms"`.
    pub remaining_key: Option<String>,
}

/// Copy the listed request headers into the record, keyed by header name.
///
/// Missing headers and values that are not visible ASCII are skipped.
pub fn header_extractor<I>(headers: I, options: HeaderExtractorOptions) -> ContextExtractor
where
    I: IntoIterator<Item = HeaderName>,
{
    let headers: Vec<HeaderName> = headers.into_iter().collect();
    let group = non_empty(options.group);

    Arc::new(move |parts: &Parts| {
        headers
            .iter()
            .filter_map(|name| {
                let value = parts.headers.get(name)?.to_str().ok()?;
                Some(LogAttr::new(qualify(group.as_deref(), name.as_str()), value))
            })
            .collect()
    })
}

/// Record the request's deadline and the budget left when it arrived.
///
/// Uses the deadline on the request's [`RequestContext`] when one is attached.
/// Otherwise falls back to the deadline the caller advertised in the header
/// named by `config`, which is what the access log sees when it sits outside
/// the deadline layer. Nothing is recorded when neither is present.
pub fn deadline_extractor(
    config: &DeadlineConfig,
    options: DeadlineExtractorOptions,
) -> ContextExtractor {
    let header_name = config.header_name().clone();
    let group = non_empty(options.group);
    let deadline_key = qualify(
        group.as_deref(),
        non_empty(options.deadline_key).as_deref().unwrap_or("deadline"),
    );
    let remaining_key = qualify(
        group.as_deref(),
        non_empty(options.remaining_key)
            .as_deref()
            .unwrap_or("deadline_remaining_ms"),
    );

    Arc::new(move |parts: &Parts| {
        let deadline = parts
            .extensions
            .get::<RequestContext>()
            .and_then(RequestContext::deadline)
            .or_else(|| {
                parts
                    .headers
                    .get(&header_name)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_deadline)
            });

        let Some(deadline) = deadline else {
            return Vec::new();
        };

        let remaining_ms = (deadline - Utc::now()).num_milliseconds().max(0);
        vec![
            LogAttr::new(deadline_key.clone(), format_deadline(deadline)),
            LogAttr::new(remaining_key.clone(), remaining_ms.to_string()),
        ]
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn qualify(group: Option<&str>, key: &str) -> String {
    match group {
        Some(group) => format!("{group}.{key}"),
        None => key.to_string(),
    }
}
