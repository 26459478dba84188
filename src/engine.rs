//! Per-request lifecycle handling.
//!
//! Resolves the policy for a request, evaluates it against the injected
//! clock, renders the decision and notifies telemetry. Transport adapters
//! map the returned [`RenderedResponse`] onto their own response type and
//! short-circuit normal handling when it is blocking.

use crate::clock::{Clock, SystemClock};
use crate::config::{GlobalSettings, LifecycleConfig};
use crate::evaluator::{evaluate, Action};
use crate::headers::{render, RenderedResponse};
use crate::metrics::{DeprecationMetrics, MetricsSink};
use crate::registry::PolicyRegistry;
use crate::schema::{annotate, AnnotationReport, NodeId, SchemaTree};
use crate::telemetry::{RequestDescriptor, TelemetryContext, TelemetryDispatcher};
use std::sync::Arc;
use tracing::{debug, info};

/// API lifecycle engine
///
/// Owns the policy registry, the time source and the telemetry dispatcher
/// for one application.
pub struct LifecycleEngine {
    registry: PolicyRegistry,
    settings: GlobalSettings,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<TelemetryDispatcher>,
    metrics: Option<Arc<DeprecationMetrics>>,
}

impl LifecycleEngine {
    /// Create an engine over a registry, using the system clock.
    pub fn new(registry: PolicyRegistry) -> Self {
        info!(policies = registry.len(), "API lifecycle engine initialized");

        Self {
            registry,
            settings: GlobalSettings::default(),
            clock: Arc::new(SystemClock),
            dispatcher: Arc::new(TelemetryDispatcher::new()),
            metrics: None,
        }
    }

    /// Create an engine from configuration, registering the metrics sink if enabled.
    pub fn from_config(config: &LifecycleConfig) -> anyhow::Result<Self> {
        let mut engine =
            Self::new(config.build_registry()?).with_settings(config.settings.clone());

        if config.metrics.enabled {
            let metrics = Arc::new(DeprecationMetrics::new(&config.metrics.prefix)?);
            engine.dispatcher.register(MetricsSink::new(metrics.clone()));
            engine.metrics = Some(metrics);
        }

        Ok(engine)
    }

    pub fn with_settings(mut self, settings: GlobalSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a dispatcher owned elsewhere.
    pub fn with_dispatcher(mut self, dispatcher: Arc<TelemetryDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<TelemetryDispatcher> {
        &self.dispatcher
    }

    /// Metrics collector registered from configuration, if enabled.
    pub fn metrics(&self) -> Option<&Arc<DeprecationMetrics>> {
        self.metrics.as_ref()
    }

    /// Evaluate a request. `None` when no policy applies to it.
    pub fn process_request(&self, request: &RequestDescriptor) -> Option<RenderedResponse> {
        let entry = self.registry.find(&request.method, &request.path)?;

        debug!(
            policy_id = %entry.id,
            path = %request.path,
            method = %request.method,
            "Request matches lifecycle policy"
        );

        let now = self.clock.now();
        let response = render(&evaluate(&entry.policy, now));

        if response.action == Action::Allow {
            return Some(response);
        }

        if self.settings.log_access {
            if response.is_blocking() {
                info!(
                    policy_id = %entry.id,
                    path = %request.path,
                    method = %request.method,
                    action = %response.action,
                    status = ?response.status_code,
                    "Request to retired endpoint blocked"
                );
            } else {
                debug!(
                    policy_id = %entry.id,
                    path = %request.path,
                    method = %request.method,
                    "Deprecated endpoint accessed"
                );
            }
        }

        self.dispatcher.dispatch(&TelemetryContext {
            request,
            response: &response,
            policy: &entry.policy,
            now,
            policy_id: Some(&entry.id),
        });

        Some(response)
    }

    /// Annotate a schema tree with the registered policies at the current instant.
    pub fn annotate_schema(&self, tree: &mut SchemaTree, root: NodeId) -> AnnotationReport {
        annotate(tree, root, &self.registry, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TelemetryCallbackError;
    use crate::schema::SchemaDocument;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn test_config() -> LifecycleConfig {
        let yaml = r#"
policies:
  - id: legacy-users
    path: /api/v1/users
    methods: [GET, POST]
    deprecation_at: "2024-01-01"
    sunset_at: "2025-01-01"
    alternative: /new

  - id: gone-posts
    path: /api/v1/posts
    sunset_at: "2025-01-01"
    detail: gone

  - id: browned-out
    path: /api/v1/orders
    match: prefix
    sunset_at: "2025-12-31"
    brownouts:
      - start: "2025-11-01T09:00:00Z"
        end: "2025-11-01T10:00:00Z"

  - id: future
    path: /api/v1/reports
    deprecation_at: "2030-01-01"

metrics:
  enabled: false
"#;
        LifecycleConfig::from_yaml(yaml).unwrap()
    }

    fn engine_at(now: &str) -> (LifecycleEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(utc(now)));
        let engine = LifecycleEngine::from_config(&test_config())
            .unwrap()
            .with_clock(clock.clone());
        (engine, clock)
    }

    #[test]
    fn test_engine_creation() {
        let (engine, _) = engine_at("2024-06-01T00:00:00Z");
        assert_eq!(engine.registry().len(), 4);
        assert!(!engine.dispatcher().has_sink());
        assert!(engine.metrics().is_none());
    }

    #[test]
    fn test_non_matching_request() {
        let (engine, _) = engine_at("2024-06-01T00:00:00Z");
        assert!(engine
            .process_request(&RequestDescriptor::new("GET", "/api/v2/users"))
            .is_none());
        assert!(engine
            .process_request(&RequestDescriptor::new("DELETE", "/api/v1/users"))
            .is_none());
    }

    #[test]
    fn test_warn_then_sunset() {
        let (engine, clock) = engine_at("2024-06-01T00:00:00Z");
        let request = RequestDescriptor::new("GET", "/api/v1/users");

        let warn = engine.process_request(&request).unwrap();
        assert_eq!(warn.action, Action::Warn);
        assert_eq!(warn.headers.get("Deprecation"), Some("@1704067200"));
        assert_eq!(warn.headers.get("Sunset"), Some("Wed, 01 Jan 2025 00:00:00 GMT"));
        assert_eq!(warn.headers.get("Link"), Some("</new>; rel=\"alternative\""));

        clock.set(utc("2025-02-01T00:00:00Z"));
        let blocked = engine.process_request(&request).unwrap();
        assert_eq!(blocked.action, Action::BlockSunset);
        assert_eq!(blocked.status_code, Some(301));
        assert_eq!(blocked.headers.get("Location"), Some("/new"));
        assert_eq!(blocked.headers.get("Deprecation"), Some("@1704067200"));
    }

    #[test]
    fn test_gone_without_alternative() {
        let (engine, _) = engine_at("2025-02-01T00:00:00Z");
        let response = engine
            .process_request(&RequestDescriptor::new("GET", "/api/v1/posts"))
            .unwrap();

        assert_eq!(response.action, Action::BlockSunset);
        assert_eq!(response.status_code, Some(410));
        assert_eq!(response.body.as_deref(), Some("gone"));
    }

    #[test]
    fn test_brownout_then_allow() {
        let (engine, clock) = engine_at("2025-11-01T09:30:00Z");
        let request = RequestDescriptor::new("GET", "/api/v1/orders/42");

        let response = engine.process_request(&request).unwrap();
        assert_eq!(response.action, Action::BlockBrownout);
        assert_eq!(response.status_code, Some(410));

        clock.set(utc("2025-11-01T10:30:00Z"));
        let response = engine.process_request(&request).unwrap();
        assert_eq!(response.action, Action::Allow);
        assert!(response.headers.is_empty());
    }

    #[test]
    fn test_telemetry_skips_allow() {
        let (engine, clock) = engine_at("2025-11-01T09:30:00Z");
        let seen: Arc<Mutex<Vec<(String, Action)>>> = Arc::new(Mutex::new(Vec::new()));

        let sink_seen = seen.clone();
        engine.dispatcher().register(
            move |ctx: &TelemetryContext<'_>| -> Result<(), TelemetryCallbackError> {
                sink_seen.lock().unwrap().push((
                    ctx.policy_id.unwrap_or_default().to_string(),
                    ctx.response.action,
                ));
                Ok(())
            },
        );

        let request = RequestDescriptor::new("GET", "/api/v1/orders");
        engine.process_request(&request);
        clock.set(utc("2025-11-01T10:30:00Z"));
        engine.process_request(&request);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![("browned-out".to_string(), Action::BlockBrownout)]
        );
    }

    #[test]
    fn test_shared_dispatcher_sees_query() {
        let shared = Arc::new(TelemetryDispatcher::new());
        let (engine, _) = engine_at("2024-06-01T00:00:00Z");
        let engine = engine.with_dispatcher(shared.clone());

        let queries: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_queries = queries.clone();
        shared.register(
            move |ctx: &TelemetryContext<'_>| -> Result<(), TelemetryCallbackError> {
                sink_queries.lock().unwrap().push(ctx.request.query.clone());
                Ok(())
            },
        );

        let request = RequestDescriptor::new("GET", "/api/v1/users").with_query("page=2");
        engine.process_request(&request).unwrap();

        assert!(Arc::ptr_eq(engine.dispatcher(), &shared));
        assert_eq!(*queries.lock().unwrap(), vec![Some("page=2".to_string())]);
    }

    #[test]
    fn test_failing_telemetry_does_not_affect_response() {
        let (engine, _) = engine_at("2024-06-01T00:00:00Z");
        engine.dispatcher().register(
            |_: &TelemetryContext<'_>| -> Result<(), TelemetryCallbackError> {
                Err(TelemetryCallbackError::failed("boom"))
            },
        );

        let response = engine
            .process_request(&RequestDescriptor::new("POST", "/api/v1/users"))
            .unwrap();
        assert_eq!(response.action, Action::Warn);
    }

    #[test]
    fn test_metrics_sink_from_config() {
        let mut config = test_config();
        config.metrics.enabled = true;
        config.metrics.prefix = "engine_test".to_string();

        let engine = LifecycleEngine::from_config(&config)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new(utc("2025-02-01T00:00:00Z"))));
        assert!(engine.dispatcher().has_sink());

        let response = engine
            .process_request(&RequestDescriptor::new("GET", "/api/v1/posts"))
            .unwrap();
        assert_eq!(response.status_code, Some(410));

        let output = engine.metrics().unwrap().encode().unwrap();
        assert!(output.contains("engine_test_blocked_total"));
        assert!(output.contains("gone-posts"));
        assert!(output.contains("engine_test_days_until_sunset{policy_id=\"gone-posts\"} -31"));
    }

    #[test]
    fn test_annotate_schema_uses_clock() {
        let (engine, clock) = engine_at("2025-01-01T00:00:00Z");
        let mut doc = SchemaDocument::new("api");
        doc.add_operation("get", "/api/v1/reports", serde_json::json!({}));
        let mut tree = SchemaTree::new();
        let root = tree.add(doc);

        let report = engine.annotate_schema(&mut tree, root);
        assert_eq!(report.marked_upcoming, 1);
        let op = tree.document(root).unwrap().operation("GET", "/api/v1/reports").unwrap();
        assert!(op.get("deprecated").is_none());

        clock.set(utc("2030-01-02T00:00:00Z"));
        let report = engine.annotate_schema(&mut tree, root);
        assert_eq!(report.marked_deprecated, 1);
        let op = tree.document(root).unwrap().operation("GET", "/api/v1/reports").unwrap();
        assert_eq!(op["deprecated"], serde_json::json!(true));
    }
}
