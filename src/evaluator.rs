//! Lifecycle evaluation: `(policy, now) -> Decision`.
//!
//! Priority, highest first:
//!
//! 1. sunset reached (`now >= sunset_at`) blocks permanently,
//! 2. an active brownout window blocks temporarily,
//! 3. an announced deprecation (past or future) warns,
//! 4. anything else is allowed untouched.
//!
//! The evaluator is pure. Header values stay typed here and are rendered to
//! wire strings by [`crate::headers`].

use crate::policy::DeprecationPolicy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Body sent with a 410 when the policy has no `detail`.
pub const DEFAULT_GONE_DETAIL: &str = "Endpoint is deprecated and no longer available.";

/// Body sent with a 301 when the policy has no `detail`.
pub const DEFAULT_MOVED_DETAIL: &str = "Endpoint is deprecated and replaced.";

/// Content type of the default blocking bodies.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Relation used for the policy's `alternative` link.
pub const ALTERNATIVE_REL: &str = "alternative";

/// What the caller should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Serve normally, no lifecycle headers
    Allow,
    /// Serve normally, attach lifecycle headers
    Warn,
    /// Refuse: the sunset has passed
    BlockSunset,
    /// Refuse: inside a scheduled brownout window
    BlockBrownout,
}

impl Action {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Action::BlockSunset | Action::BlockBrownout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Warn => "warn",
            Action::BlockSunset => "block_sunset",
            Action::BlockBrownout => "block_brownout",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A header the decision asks for, before wire formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderField {
    /// RFC 9745 `Deprecation`
    Deprecation(DateTime<Utc>),
    /// RFC 8594 `Sunset`
    Sunset(DateTime<Utc>),
    /// One `Link` entry
    Link { uri: String, rel: String },
    Location(String),
    CacheControl { max_age: u64 },
    CacheTag(String),
    SurrogateKey(String),
    /// Passed through from an override response
    Custom { name: String, value: String },
}

impl HeaderField {
    /// Header name as sent on the wire.
    pub fn name(&self) -> &str {
        match self {
            HeaderField::Deprecation(_) => "Deprecation",
            HeaderField::Sunset(_) => "Sunset",
            HeaderField::Link { .. } => "Link",
            HeaderField::Location(_) => "Location",
            HeaderField::CacheControl { .. } => "Cache-Control",
            HeaderField::CacheTag(_) => "Cache-Tag",
            HeaderField::SurrogateKey(_) => "Surrogate-Key",
            HeaderField::Custom { name, .. } => name,
        }
    }
}

/// Outcome of one evaluation. Created per request and discarded after rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub headers: Vec<HeaderField>,
    /// Set only for blocking actions
    pub status_code: Option<u16>,
    pub body: Option<String>,
    pub content_type: Option<String>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            action: Action::Allow,
            headers: Vec::new(),
            status_code: None,
            body: None,
            content_type: None,
        }
    }
}

/// Classify a policy against an instant.
pub fn evaluate(policy: &DeprecationPolicy, now: DateTime<Utc>) -> Decision {
    let action = if policy.is_past_sunset(now) {
        Action::BlockSunset
    } else if policy.is_brownout_active(now) {
        Action::BlockBrownout
    } else if policy.deprecation_at().is_some() {
        Action::Warn
    } else {
        return Decision::allow();
    };

    let mut headers = lifecycle_headers(policy);

    if action == Action::Warn {
        if let (true, Some(sunset)) = (policy.inject_cache_control(), policy.sunset_at()) {
            let max_age = (sunset - now).num_seconds().max(0) as u64;
            headers.push(HeaderField::CacheControl { max_age });
        }
        push_cache_tags(policy, &mut headers);

        return Decision {
            action,
            headers,
            status_code: None,
            body: None,
            content_type: None,
        };
    }

    push_cache_tags(policy, &mut headers);
    blocking_decision(policy, action, headers)
}

/// Deprecation, Sunset and Link fields shared by every non-allow decision.
fn lifecycle_headers(policy: &DeprecationPolicy) -> Vec<HeaderField> {
    let mut headers = Vec::new();

    if let Some(deprecation) = policy.deprecation_at() {
        headers.push(HeaderField::Deprecation(deprecation));
    }
    if let Some(sunset) = policy.sunset_at() {
        headers.push(HeaderField::Sunset(sunset));
    }
    if let Some(alternative) = policy.alternative() {
        headers.push(HeaderField::Link {
            uri: alternative.to_string(),
            rel: ALTERNATIVE_REL.to_string(),
        });
    }
    for (rel, uri) in policy.links() {
        headers.push(HeaderField::Link {
            uri: uri.clone(),
            rel: rel.clone(),
        });
    }

    headers
}

fn push_cache_tags(policy: &DeprecationPolicy, headers: &mut Vec<HeaderField>) {
    if let Some(tag) = policy.cache_tag() {
        headers.push(HeaderField::CacheTag(tag.to_string()));
        headers.push(HeaderField::SurrogateKey(tag.to_string()));
    }
}

fn blocking_decision(
    policy: &DeprecationPolicy,
    action: Action,
    lifecycle: Vec<HeaderField>,
) -> Decision {
    if let Some(response) = policy.override_response() {
        // Override headers may not shadow Deprecation or Sunset.
        let mut headers: Vec<HeaderField> = response
            .headers
            .iter()
            .filter(|(name, _)| !is_reserved(name))
            .map(|(name, value)| HeaderField::Custom {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        headers.extend(lifecycle);

        return Decision {
            action,
            headers,
            status_code: Some(response.status_code),
            body: response.body.clone(),
            content_type: response.content_type.clone(),
        };
    }

    match policy.alternative() {
        Some(alternative) => {
            let mut headers = lifecycle;
            headers.push(HeaderField::Location(alternative.to_string()));
            Decision {
                action,
                headers,
                status_code: Some(301),
                body: Some(policy.detail().unwrap_or(DEFAULT_MOVED_DETAIL).to_string()),
                content_type: Some(TEXT_CONTENT_TYPE.to_string()),
            }
        }
        None => Decision {
            action,
            headers: lifecycle,
            status_code: Some(410),
            body: Some(policy.detail().unwrap_or(DEFAULT_GONE_DETAIL).to_string()),
            content_type: Some(TEXT_CONTENT_TYPE.to_string()),
        },
    }
}

fn is_reserved(name: &str) -> bool {
    ["Deprecation", "Sunset"]
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}
