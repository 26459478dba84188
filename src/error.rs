//! Error types for policy construction and telemetry dispatch.
//!
//! Construction errors surface to the caller before any traffic is served.
//! Evaluation has no error path. Telemetry errors never leave the dispatcher.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A date input could not be turned into an absolute UTC instant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid date input {input:?}: {reason}")]
pub struct DateParseError {
    /// The offending input, rendered as text
    pub input: String,
    /// Why normalization rejected it
    pub reason: String,
}

impl DateParseError {
    pub(crate) fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// A policy violated one of its temporal or response invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyValidationError {
    /// `sunset_at` precedes `deprecation_at`
    #[error("sunset_at ({sunset}) cannot be earlier than deprecation_at ({deprecation})")]
    SunsetBeforeDeprecation {
        deprecation: DateTime<Utc>,
        sunset: DateTime<Utc>,
    },

    /// A brownout window whose start is not strictly before its end
    #[error("brownout window #{index} is empty: start {start} must be before end {end}")]
    EmptyBrownout {
        index: usize,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// The override response carries a status outside the HTTP range
    #[error("override response status {0} is not a valid HTTP status code")]
    InvalidOverrideStatus(u16),
}

/// Any failure raised while building a policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    DateParse(#[from] DateParseError),

    #[error(transparent)]
    PolicyValidation(#[from] PolicyValidationError),
}

/// A registered telemetry sink failed. Caught at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryCallbackError {
    #[error("telemetry callback failed: {0}")]
    Failed(String),

    #[error("telemetry callback panicked: {0}")]
    Panicked(String),
}

impl TelemetryCallbackError {
    /// Wrap any displayable error as a callback failure.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed(error.to_string())
    }
}
