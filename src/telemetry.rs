//! Telemetry dispatch for lifecycle evaluations.
//!
//! A [`TelemetryDispatcher`] owns a single replaceable sink slot. It is an
//! ordinary value held by whoever owns the application lifetime, so tests
//! can each run their own dispatcher.
//!
//! Sinks may fail or panic; the dispatcher catches both and only logs them.
//! A misbehaving sink can never turn a served response into an error.

use crate::error::TelemetryCallbackError;
use crate::headers::RenderedResponse;
use crate::policy::DeprecationPolicy;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// The request an evaluation was made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Everything a sink gets to see about one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryContext<'a> {
    pub request: &'a RequestDescriptor,
    pub response: &'a RenderedResponse,
    pub policy: &'a DeprecationPolicy,
    /// Instant the decision was evaluated at
    pub now: DateTime<Utc>,
    /// Registry id of the policy, when it was resolved from one
    pub policy_id: Option<&'a str>,
}

/// Receiver of lifecycle telemetry.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, context: &TelemetryContext<'_>) -> Result<(), TelemetryCallbackError>;
}

impl<F> TelemetrySink for F
where
    F: Fn(&TelemetryContext<'_>) -> Result<(), TelemetryCallbackError> + Send + Sync,
{
    fn record(&self, context: &TelemetryContext<'_>) -> Result<(), TelemetryCallbackError> {
        self(context)
    }
}

/// What happened to a dispatched context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No sink registered
    NoSink,
    /// The sink accepted the context
    Delivered,
    /// The sink failed; the error was logged and dropped
    Suppressed(TelemetryCallbackError),
}

/// Single-slot, last-writer-wins telemetry dispatcher.
#[derive(Default)]
pub struct TelemetryDispatcher {
    slot: RwLock<Option<Arc<dyn TelemetrySink>>>,
}

impl TelemetryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a sink, replacing whatever was registered before.
    pub fn register(&self, sink: impl TelemetrySink + 'static) {
        self.register_arc(Arc::new(sink));
    }

    /// Install an already shared sink.
    pub fn register_arc(&self, sink: Arc<dyn TelemetrySink>) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        debug!("Telemetry sink registered");
    }

    /// Remove the current sink.
    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn has_sink(&self) -> bool {
        self.current().is_some()
    }

    /// Hand a context to the current sink. Never fails.
    pub fn dispatch(&self, context: &TelemetryContext<'_>) -> DispatchOutcome {
        // Read the slot once; the sink runs outside the lock.
        let Some(sink) = self.current() else {
            return DispatchOutcome::NoSink;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| sink.record(context)))
            .unwrap_or_else(|payload| Err(TelemetryCallbackError::Panicked(panic_message(payload))));

        match result {
            Ok(()) => DispatchOutcome::Delivered,
            Err(error) => {
                warn!(
                    error = %error,
                    method = %context.request.method,
                    path = %context.request.path,
                    action = %context.response.action,
                    "Telemetry callback failed"
                );
                DispatchOutcome::Suppressed(error)
            }
        }
    }

    fn current(&self) -> Option<Arc<dyn TelemetrySink>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl std::fmt::Debug for TelemetryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryDispatcher")
            .field("has_sink", &self.has_sink())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
