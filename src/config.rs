//! Configuration for the API lifecycle engine.
//!
//! Declares lifecycle policies per operation or path prefix, access logging
//! and metrics options. Dates are normalized and every policy is validated
//! when the registry is built, before any request is evaluated.

use crate::date::DateInput;
use crate::policy::{DeprecationPolicy, OverrideResponse};
use crate::registry::{MatchKind, PathPattern, PolicyRegistry};
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Main configuration for the lifecycle engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Lifecycle policies, most specific match wins
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LifecycleConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut ids = HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !ids.insert(policy.id.as_str()) {
                anyhow::bail!("Duplicate policy id: {}", policy.id);
            }
        }
        Ok(())
    }

    /// Build a registry with every configured policy.
    pub fn build_registry(&self) -> anyhow::Result<PolicyRegistry> {
        let mut registry = PolicyRegistry::new();
        for entry in &self.policies {
            let pattern = PathPattern::new(&entry.path, entry.match_kind)
                .with_context(|| format!("invalid path pattern for policy: {}", entry.id))?;
            registry.register(&entry.id, &entry.methods, pattern, entry.to_policy()?);
        }
        Ok(registry)
    }
}

/// Configuration for a single lifecycle policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Unique identifier for this policy
    pub id: String,

    /// Path or pattern to match
    pub path: String,

    /// HTTP methods to match (empty means all methods)
    #[serde(default)]
    pub methods: Vec<String>,

    /// How `path` is matched
    #[serde(default, rename = "match")]
    pub match_kind: MatchKind,

    /// When the deprecation is (or will be) announced
    #[serde(default)]
    pub deprecation_at: Option<DateInput>,

    /// When the operation stops being served
    #[serde(default)]
    pub sunset_at: Option<DateInput>,

    /// Replacement resource
    #[serde(default)]
    pub alternative: Option<String>,

    /// Migration documentation, sent as rel="deprecation"
    #[serde(default)]
    pub link: Option<String>,

    /// Additional link relations, in header order
    #[serde(default)]
    pub links: Vec<LinkConfig>,

    /// Message returned by blocking responses
    #[serde(default)]
    pub detail: Option<String>,

    /// Scheduled brownout windows
    #[serde(default)]
    pub brownouts: Vec<BrownoutConfig>,

    /// Advertise a cache lifetime bounded by the sunset
    #[serde(default)]
    pub inject_cache_control: bool,

    /// Cache-Tag / Surrogate-Key value
    #[serde(default)]
    pub cache_tag: Option<String>,

    /// Response used instead of 301/410 when blocking
    #[serde(default)]
    pub response: Option<ResponseConfig>,
}

impl PolicyConfig {
    /// Validate the policy configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Policy id cannot be empty");
        }
        if self.path.is_empty() {
            anyhow::bail!("Policy path cannot be empty for id: {}", self.id);
        }
        PathPattern::new(&self.path, self.match_kind)
            .with_context(|| format!("invalid path pattern for policy: {}", self.id))?;
        self.to_policy()?;
        Ok(())
    }

    /// Build the immutable policy this entry describes.
    pub fn to_policy(&self) -> anyhow::Result<DeprecationPolicy> {
        let mut builder = DeprecationPolicy::builder();

        if let Some(at) = &self.deprecation_at {
            builder = builder.deprecation_at(at.clone());
        }
        if let Some(at) = &self.sunset_at {
            builder = builder.sunset_at(at.clone());
        }
        if let Some(alternative) = &self.alternative {
            builder = builder.alternative(alternative);
        }
        for link in &self.links {
            builder = builder.link(&link.rel, &link.href);
        }
        if let Some(docs) = &self.link {
            builder = builder.documentation(docs);
        }
        if let Some(detail) = &self.detail {
            builder = builder.detail(detail);
        }
        for window in &self.brownouts {
            builder = builder.brownout(window.start.clone(), window.end.clone());
        }
        if let Some(tag) = &self.cache_tag {
            builder = builder.cache_tag(tag);
        }
        if let Some(response) = &self.response {
            builder = builder.override_response(response.to_override());
        }

        builder
            .inject_cache_control(self.inject_cache_control)
            .build()
            .with_context(|| format!("invalid lifecycle policy: {}", self.id))
    }
}

/// One link relation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    pub rel: String,
    pub href: String,
}

/// One brownout window.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrownoutConfig {
    pub start: DateInput,
    pub end: DateInput,
}

/// Custom blocking response.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseConfig {
    /// HTTP status code
    pub status_code: u16,

    /// Response body
    #[serde(default)]
    pub body: Option<String>,

    /// Content-Type header
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Extra headers, in order
    #[serde(default)]
    pub headers: Vec<HeaderConfig>,
}

impl ResponseConfig {
    fn to_override(&self) -> OverrideResponse {
        let mut response =
            OverrideResponse::new(self.status_code).with_content_type(&self.content_type);
        if let Some(body) = &self.body {
            response = response.with_body(body);
        }
        for header in &self.headers {
            response = response.with_header(&header.name, &header.value);
        }
        response
    }
}

/// Extra response header.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderConfig {
    pub name: String,
    pub value: String,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_true() -> bool {
    true
}

/// Global settings for the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Whether to log every request that hits a policy
    #[serde(default = "default_true")]
    pub log_access: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self { log_access: true }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether to register the Prometheus telemetry sink
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix for metric names
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_metrics_prefix(),
        }
    }
}

fn default_metrics_prefix() -> String {
    "zentinel_api_lifecycle".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PolicyResolver;
    use std::io::Write;

    const BASIC: &str = r#"
policies:
  - id: legacy-users
    path: /api/v1/users
    methods: [GET, POST]
    deprecation_at: "2024-01-01"
    sunset_at: "2025-01-01T00:00:00Z"
    alternative: /api/v2/users
    link: https://docs.example.com/migration/users
    links:
      - rel: successor-version
        href: /api/v2/users
    detail: Please migrate to the v2 API

  - id: v1-prefix
    path: /api/v1
    match: prefix
    sunset_at: 1767225600
    brownouts:
      - start: "2025-11-01T09:00:00Z"
        end: "2025-11-01T10:00:00Z"
    response:
      status_code: 503
      body: '{"error":"brownout"}'
      headers:
        - name: Retry-After
          value: "3600"
"#;

    #[test]
    fn test_parse_basic_config() {
        let config = LifecycleConfig::from_yaml(BASIC).unwrap();
        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.policies[0].id, "legacy-users");
        assert_eq!(config.policies[0].methods, vec!["GET", "POST"]);
        assert_eq!(config.policies[1].match_kind, MatchKind::Prefix);
        assert!(config.settings.log_access);
        assert_eq!(config.metrics.prefix, "zentinel_api_lifecycle");
    }

    #[test]
    fn test_policy_conversion() {
        let config = LifecycleConfig::from_yaml(BASIC).unwrap();
        let policy = config.policies[0].to_policy().unwrap();

        assert_eq!(
            policy.links(),
            &[
                ("successor-version".to_string(), "/api/v2/users".to_string()),
                (
                    "deprecation".to_string(),
                    "https://docs.example.com/migration/users".to_string()
                ),
            ]
        );
        assert_eq!(policy.detail(), Some("Please migrate to the v2 API"));

        let prefix = config.policies[1].to_policy().unwrap();
        let response = prefix.override_response().unwrap();
        assert_eq!(response.status_code, 503);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(
            response.headers,
            vec![("Retry-After".to_string(), "3600".to_string())]
        );
    }

    #[test]
    fn test_build_registry() {
        let registry = LifecycleConfig::from_yaml(BASIC)
            .unwrap()
            .build_registry()
            .unwrap();

        assert_eq!(registry.find("GET", "/api/v1/users").unwrap().id, "legacy-users");
        assert_eq!(registry.find("DELETE", "/api/v1/users").unwrap().id, "v1-prefix");
        assert!(registry.resolve("GET", "/api/v2/users").is_none());
    }

    #[test]
    fn test_invalid_dates_rejected() {
        let yaml = r#"
policies:
  - id: broken
    path: /api/v1/users
    deprecation_at: "2025-01-01"
    sunset_at: "2024-01-01"
"#;
        let err = LifecycleConfig::from_yaml(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));

        let yaml = r#"
policies:
  - id: garbled
    path: /api/v1/users
    sunset_at: "whenever"
"#;
        assert!(LifecycleConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_brownout_rejected() {
        let yaml = r#"
policies:
  - id: backwards
    path: /api/v1
    brownouts:
      - start: "2025-01-01T10:00:00Z"
        end: "2025-01-01T09:00:00Z"
"#;
        assert!(LifecycleConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
policies:
  - id: same
    path: /a
  - id: same
    path: /b
"#;
        let err = LifecycleConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate policy id"));
    }

    #[test]
    fn test_bundled_default_config() {
        let config =
            LifecycleConfig::from_yaml(include_str!("../config/default-config.yaml")).unwrap();
        let registry = config.build_registry().unwrap();

        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.find("GET", "/api/v1/users").unwrap().id,
            "legacy-users-api"
        );
        assert_eq!(registry.find("DELETE", "/api/v1/users").unwrap().id, "v1-api");
        assert_eq!(
            registry.find("GET", "/api/v2/reports/7/export").unwrap().id,
            "reports-export"
        );
    }

    #[test]
    fn test_empty_path_rejected() {
        let yaml = r#"
policies:
  - id: nowhere
    path: ""
"#;
        assert!(LifecycleConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
policies:
  - id: typo
    path: /a
    sunset: "2025-01-01"
"#;
        assert!(LifecycleConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BASIC.as_bytes()).unwrap();

        let config = LifecycleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.policies.len(), 2);

        let missing = LifecycleConfig::from_file(Path::new("/nonexistent/lifecycle.yaml"));
        assert!(missing.is_err());
    }
}
