//! Header rendering for lifecycle decisions.
//!
//! Implements the wire formats of:
//! - Deprecation header (RFC 9745): `@<unix-seconds>`
//! - Sunset header (RFC 8594): IMF-fixdate per RFC 7231
//! - Link header (RFC 8288): one entry per relation

use crate::evaluator::{Action, Decision, HeaderField};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Ordered header list. Names may repeat and compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, keeping any existing ones with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for a header name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for a header name, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get headers as a vector of tuples.
    pub fn to_vec(self) -> Vec<(String, String)> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a (String, String);
    type IntoIter = std::slice::Iter<'a, (String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A decision flattened into transport-ready pieces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedResponse {
    pub action: Action,
    pub status_code: Option<u16>,
    pub headers: HeaderList,
    pub body: Option<String>,
    pub content_type: Option<String>,
}

impl RenderedResponse {
    /// Check whether the caller must short-circuit normal handling.
    pub fn is_blocking(&self) -> bool {
        self.action.is_blocking()
    }
}

/// Render every header field of a decision, preserving order and multiplicity.
pub fn format(decision: &Decision) -> HeaderList {
    let mut headers = HeaderList::new();
    for field in &decision.headers {
        headers.append(field.name(), format_value(field));
    }
    headers
}

/// Render a whole decision for a transport adapter.
pub fn render(decision: &Decision) -> RenderedResponse {
    RenderedResponse {
        action: decision.action,
        status_code: decision.status_code,
        headers: format(decision),
        body: decision.body.clone(),
        content_type: decision.content_type.clone(),
    }
}

/// Wire value for a single header field.
pub fn format_value(field: &HeaderField) -> String {
    match field {
        HeaderField::Deprecation(at) => format_deprecation(at),
        HeaderField::Sunset(at) => format_http_date(at),
        HeaderField::Link { uri, rel } => format_link(uri, rel),
        HeaderField::Location(uri) => uri.clone(),
        HeaderField::CacheControl { max_age } => format!("max-age={}", max_age),
        HeaderField::CacheTag(tag) | HeaderField::SurrogateKey(tag) => tag.clone(),
        HeaderField::Custom { value, .. } => value.clone(),
    }
}

/// Format a Deprecation header value (RFC 9651 date item).
/// Example: @1704067200
pub fn format_deprecation(dt: &DateTime<Utc>) -> String {
    format!("@{}", dt.timestamp())
}

/// Parse a Deprecation header value back into an instant.
pub fn parse_deprecation_value(s: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = s.trim().strip_prefix('@')?.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Format a datetime as an HTTP date (RFC 7231).
/// Example: Sun, 06 Nov 1994 08:49:37 GMT
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date to DateTime<Utc>.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC 7231 format first (strip " GMT" suffix and parse as naive, then add UTC)
    if let Some(without_tz) = s.strip_suffix(" GMT") {
        if let Ok(naive) = NaiveDateTime::parse_from_str(without_tz, "%a, %d %b %Y %H:%M:%S") {
            return Some(naive.and_utc());
        }
    }

    // Try ISO 8601 as fallback
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt);
    }

    None
}

/// Format one Link entry.
/// Example: </new-endpoint>; rel="alternative"
pub fn format_link(uri: &str, rel: &str) -> String {
    format!("<{}>; rel=\"{}\"", uri, rel)
}
