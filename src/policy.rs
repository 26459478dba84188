//! Deprecation policy: the immutable description of one operation's lifecycle.
//!
//! A policy is built once, when a route or prefix is declared, and shared
//! across every request that hits it. All date inputs are normalized and all
//! invariants are checked in [`PolicyBuilder::build`]; evaluation never fails.

use crate::date::DateInput;
use crate::error::{LifecycleError, PolicyValidationError};
use chrono::{DateTime, Utc};

/// Link relation used for the `link` shorthand.
pub const DEPRECATION_REL: &str = "deprecation";

/// A temporary blocking window before the final sunset. Half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrownoutWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BrownoutWindow {
    /// Check whether `now` falls inside this window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

/// Response used verbatim instead of the default 301/410 when blocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideResponse {
    pub status_code: u16,
    pub body: Option<String>,
    pub content_type: Option<String>,
    /// Extra headers sent with the override
    pub headers: Vec<(String, String)>,
}

impl OverrideResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            body: None,
            content_type: None,
            headers: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Immutable lifecycle description for one operation or path prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct DeprecationPolicy {
    deprecation_at: Option<DateTime<Utc>>,
    sunset_at: Option<DateTime<Utc>>,
    alternative: Option<String>,
    links: Vec<(String, String)>,
    detail: Option<String>,
    brownouts: Vec<BrownoutWindow>,
    inject_cache_control: bool,
    cache_tag: Option<String>,
    override_response: Option<OverrideResponse>,
}

impl DeprecationPolicy {
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    pub fn deprecation_at(&self) -> Option<DateTime<Utc>> {
        self.deprecation_at
    }

    pub fn sunset_at(&self) -> Option<DateTime<Utc>> {
        self.sunset_at
    }

    pub fn alternative(&self) -> Option<&str> {
        self.alternative.as_deref()
    }

    /// Additional link relations as `(relation, uri)`, in declaration order.
    pub fn links(&self) -> &[(String, String)] {
        &self.links
    }

    /// URI registered for a link relation, if any.
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|(r, _)| r == rel)
            .map(|(_, uri)| uri.as_str())
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn brownouts(&self) -> &[BrownoutWindow] {
        &self.brownouts
    }

    pub fn inject_cache_control(&self) -> bool {
        self.inject_cache_control
    }

    pub fn cache_tag(&self) -> Option<&str> {
        self.cache_tag.as_deref()
    }

    pub fn override_response(&self) -> Option<&OverrideResponse> {
        self.override_response.as_ref()
    }

    /// Check if the hard sunset has been reached.
    pub fn is_past_sunset(&self, now: DateTime<Utc>) -> bool {
        self.sunset_at.map(|sunset| now >= sunset).unwrap_or(false)
    }

    /// Check if any brownout window covers `now`. Overlaps act as a union.
    pub fn is_brownout_active(&self, now: DateTime<Utc>) -> bool {
        self.brownouts.iter().any(|window| window.contains(now))
    }

    /// Check if the deprecation has been announced and its instant reached.
    pub fn is_deprecated(&self, now: DateTime<Utc>) -> bool {
        self.deprecation_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Whole days until sunset (negative once past).
    pub fn days_until_sunset(&self, now: DateTime<Utc>) -> Option<i64> {
        self.sunset_at.map(|sunset| (sunset - now).num_days())
    }
}

/// Collects raw policy inputs; normalization and validation happen in `build`.
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    deprecation_at: Option<DateInput>,
    sunset_at: Option<DateInput>,
    alternative: Option<String>,
    links: Vec<(String, String)>,
    detail: Option<String>,
    brownouts: Vec<(DateInput, DateInput)>,
    inject_cache_control: bool,
    cache_tag: Option<String>,
    override_response: Option<OverrideResponse>,
}

impl PolicyBuilder {
    pub fn deprecation_at(mut self, at: impl Into<DateInput>) -> Self {
        self.deprecation_at = Some(at.into());
        self
    }

    pub fn sunset_at(mut self, at: impl Into<DateInput>) -> Self {
        self.sunset_at = Some(at.into());
        self
    }

    pub fn alternative(mut self, uri: impl Into<String>) -> Self {
        self.alternative = Some(uri.into());
        self
    }

    /// Add a link relation. Re-adding a relation replaces its URI in place.
    pub fn link(mut self, rel: impl Into<String>, uri: impl Into<String>) -> Self {
        let rel = rel.into();
        let uri = uri.into();
        match self.links.iter_mut().find(|(r, _)| *r == rel) {
            Some(entry) => entry.1 = uri,
            None => self.links.push((rel, uri)),
        }
        self
    }

    /// Shorthand for a `rel="deprecation"` documentation link.
    pub fn documentation(self, uri: impl Into<String>) -> Self {
        self.link(DEPRECATION_REL, uri)
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn brownout(mut self, start: impl Into<DateInput>, end: impl Into<DateInput>) -> Self {
        self.brownouts.push((start.into(), end.into()));
        self
    }

    pub fn inject_cache_control(mut self, enabled: bool) -> Self {
        self.inject_cache_control = enabled;
        self
    }

    pub fn cache_tag(mut self, tag: impl Into<String>) -> Self {
        self.cache_tag = Some(tag.into());
        self
    }

    pub fn override_response(mut self, response: OverrideResponse) -> Self {
        self.override_response = Some(response);
        self
    }

    /// Normalize every date and check the policy invariants.
    pub fn build(self) -> Result<DeprecationPolicy, LifecycleError> {
        let deprecation_at = self.deprecation_at.map(|d| d.normalize()).transpose()?;
        let sunset_at = self.sunset_at.map(|d| d.normalize()).transpose()?;

        if let (Some(deprecation), Some(sunset)) = (deprecation_at, sunset_at) {
            if sunset < deprecation {
                return Err(PolicyValidationError::SunsetBeforeDeprecation {
                    deprecation,
                    sunset,
                }
                .into());
            }
        }

        let mut brownouts = Vec::with_capacity(self.brownouts.len());
        for (index, (start, end)) in self.brownouts.into_iter().enumerate() {
            let start = start.normalize()?;
            let end = end.normalize()?;
            if start >= end {
                return Err(PolicyValidationError::EmptyBrownout { index, start, end }.into());
            }
            brownouts.push(BrownoutWindow { start, end });
        }

        if let Some(response) = &self.override_response {
            if !(100..=999).contains(&response.status_code) {
                return Err(
                    PolicyValidationError::InvalidOverrideStatus(response.status_code).into(),
                );
            }
        }

        Ok(DeprecationPolicy {
            deprecation_at,
            sunset_at,
            alternative: self.alternative,
            links: self.links,
            detail: self.detail,
            brownouts,
            inject_cache_control: self.inject_cache_control,
            cache_tag: self.cache_tag,
            override_response: self.override_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DateParseError;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_build_normalizes_dates() {
        let policy = DeprecationPolicy::builder()
            .deprecation_at("2024-01-01")
            .sunset_at(1735689600_i64)
            .build()
            .unwrap();

        assert_eq!(policy.deprecation_at(), Some(utc("2024-01-01T00:00:00Z")));
        assert_eq!(policy.sunset_at(), Some(utc("2025-01-01T00:00:00Z")));
    }

    #[test]
    fn test_sunset_before_deprecation_rejected() {
        let err = DeprecationPolicy::builder()
            .deprecation_at("2025-01-01")
            .sunset_at("2024-01-01")
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::PolicyValidation(PolicyValidationError::SunsetBeforeDeprecation { .. })
        ));
    }

    #[test]
    fn test_equal_sunset_and_deprecation_allowed() {
        let policy = DeprecationPolicy::builder()
            .deprecation_at("2025-01-01")
            .sunset_at("2025-01-01T00:00:00Z")
            .build();
        assert!(policy.is_ok());
    }

    #[test]
    fn test_empty_brownout_rejected() {
        let err = DeprecationPolicy::builder()
            .brownout("2025-01-01T10:00:00Z", "2025-01-01T10:00:00Z")
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::PolicyValidation(PolicyValidationError::EmptyBrownout {
                index: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_date_rejected() {
        let err = DeprecationPolicy::builder()
            .sunset_at("soon")
            .build()
            .unwrap_err();

        assert!(matches!(err, LifecycleError::DateParse(DateParseError { .. })));
    }

    #[test]
    fn test_overlapping_brownouts_allowed() {
        let policy = DeprecationPolicy::builder()
            .brownout("2025-01-01T10:00:00Z", "2025-01-01T12:00:00Z")
            .brownout("2025-01-01T11:00:00Z", "2025-01-01T13:00:00Z")
            .build()
            .unwrap();

        assert!(policy.is_brownout_active(utc("2025-01-01T12:30:00Z")));
        assert!(!policy.is_brownout_active(utc("2025-01-01T13:00:00Z")));
    }

    #[test]
    fn test_links_keep_order_and_replace_in_place() {
        let policy = DeprecationPolicy::builder()
            .link("successor-version", "/v2")
            .documentation("https://docs.example.com")
            .link("successor-version", "/v3")
            .build()
            .unwrap();

        assert_eq!(
            policy.links(),
            &[
                ("successor-version".to_string(), "/v3".to_string()),
                ("deprecation".to_string(), "https://docs.example.com".to_string()),
            ]
        );
        assert_eq!(policy.link(DEPRECATION_REL), Some("https://docs.example.com"));
    }

    #[test]
    fn test_invalid_override_status_rejected() {
        let err = DeprecationPolicy::builder()
            .override_response(OverrideResponse::new(42))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            LifecycleError::PolicyValidation(PolicyValidationError::InvalidOverrideStatus(42))
        );
    }

    #[test]
    fn test_days_until_sunset() {
        let policy = DeprecationPolicy::builder()
            .sunset_at("2025-01-31")
            .build()
            .unwrap();

        assert_eq!(policy.days_until_sunset(utc("2025-01-01T00:00:00Z")), Some(30));
        assert!(!policy.is_past_sunset(utc("2025-01-30T23:59:59Z")));
        assert!(policy.is_past_sunset(utc("2025-01-31T00:00:00Z")));
    }
}
