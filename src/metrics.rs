//! Metrics for tracking deprecated API usage.
//!
//! Provides Prometheus metrics for lifecycle decisions. [`MetricsSink`]
//! plugs the collector into a [`crate::telemetry::TelemetryDispatcher`].

use crate::error::TelemetryCallbackError;
use crate::evaluator::Action;
use crate::telemetry::{TelemetryContext, TelemetrySink};
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::Arc;

/// Label used when a policy did not come from a registry.
const UNNAMED_POLICY: &str = "unnamed";

/// Metrics collector for deprecated API usage.
#[derive(Clone)]
pub struct DeprecationMetrics {
    /// Registry for all metrics
    registry: Registry,

    /// Counter for requests hitting a lifecycle policy, by action
    pub requests_total: IntCounterVec,

    /// Counter for redirects to the alternative
    pub redirects_total: IntCounterVec,

    /// Counter for blocked requests (sunset or brownout)
    pub blocked_total: IntCounterVec,

    /// Gauge for days until sunset for each policy
    pub days_until_sunset: IntGaugeVec,
}

impl DeprecationMetrics {
    /// Create a new metrics collector with the given prefix.
    pub fn new(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                format!("{}_requests_total", prefix),
                "Total number of requests matching a lifecycle policy",
            ),
            &["policy_id", "method", "action"],
        )?;

        let redirects_total = IntCounterVec::new(
            Opts::new(
                format!("{}_redirects_total", prefix),
                "Total number of redirects from deprecated endpoints",
            ),
            &["policy_id", "to_path"],
        )?;

        let blocked_total = IntCounterVec::new(
            Opts::new(
                format!("{}_blocked_total", prefix),
                "Total number of blocked requests to sunset or browned-out endpoints",
            ),
            &["policy_id", "reason"],
        )?;

        let days_until_sunset = IntGaugeVec::new(
            Opts::new(
                format!("{}_days_until_sunset", prefix),
                "Days until policy sunset (negative if past)",
            ),
            &["policy_id"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(redirects_total.clone()))?;
        registry.register(Box::new(blocked_total.clone()))?;
        registry.register(Box::new(days_until_sunset.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            redirects_total,
            blocked_total,
            days_until_sunset,
        })
    }

    /// Record a request that matched a policy.
    pub fn record_request(&self, policy_id: &str, method: &str, action: Action) {
        self.requests_total
            .with_label_values(&[policy_id, method, action.as_str()])
            .inc();
    }

    /// Record a redirect to the alternative.
    pub fn record_redirect(&self, policy_id: &str, to_path: &str) {
        self.redirects_total
            .with_label_values(&[policy_id, to_path])
            .inc();
    }

    /// Record a blocked request.
    pub fn record_blocked(&self, policy_id: &str, reason: &str) {
        self.blocked_total
            .with_label_values(&[policy_id, reason])
            .inc();
    }

    /// Update the days until sunset gauge.
    pub fn set_days_until_sunset(&self, policy_id: &str, days: i64) {
        self.days_until_sunset
            .with_label_values(&[policy_id])
            .set(days);
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Telemetry sink that counts lifecycle decisions.
#[derive(Clone)]
pub struct MetricsSink {
    metrics: Arc<DeprecationMetrics>,
}

impl MetricsSink {
    pub fn new(metrics: Arc<DeprecationMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &DeprecationMetrics {
        &self.metrics
    }

    fn refresh_sunset_gauge(&self, policy_id: &str, context: &TelemetryContext<'_>) {
        if let Some(days) = context.policy.days_until_sunset(context.now) {
            self.metrics.set_days_until_sunset(policy_id, days);
        }
    }
}

impl TelemetrySink for MetricsSink {
    fn record(&self, context: &TelemetryContext<'_>) -> Result<(), TelemetryCallbackError> {
        let policy_id = context.policy_id.unwrap_or(UNNAMED_POLICY);
        let response = context.response;

        self.metrics
            .record_request(policy_id, &context.request.method, response.action);

        match response.action {
            Action::BlockSunset => self.metrics.record_blocked(policy_id, "sunset"),
            Action::BlockBrownout => self.metrics.record_blocked(policy_id, "brownout"),
            Action::Warn | Action::Allow => {}
        }

        if response.status_code == Some(301) {
            if let Some(location) = response.headers.get("Location") {
                self.metrics.record_redirect(policy_id, location);
            }
        }

        self.refresh_sunset_gauge(policy_id, context);
        Ok(())
    }
}
