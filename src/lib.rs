//! Zentinel API Lifecycle
//!
//! Decides, per request, whether an API operation is served normally, served
//! with deprecation warnings, or blocked because it is sunset or inside a
//! scheduled brownout, and renders the matching response headers.
//!
//! # Features
//!
//! - **Deprecation Headers**: RFC 9745 `Deprecation: @<epoch>` warnings
//! - **Sunset Headers**: RFC 8594 compliant Sunset headers
//! - **Brownouts**: Scheduled temporary outages before the final sunset
//! - **Automatic Redirects**: 301 to the alternative once sunset, 410 otherwise
//! - **Usage Tracking**: Pluggable telemetry with a Prometheus sink
//! - **OpenAPI Annotation**: Marks deprecated operations across mounted schemas
//!
//! # Example Configuration
//!
//! ```yaml
//! policies:
//!   - id: legacy-users-api
//!     path: /api/v1/users
//!     methods: [GET, POST]
//!     deprecation_at: "2024-01-01"
//!     sunset_at: "2025-06-01T00:00:00Z"
//!     alternative: /api/v2/users
//!     link: https://docs.example.com/migration
//!     brownouts:
//!       - start: "2025-05-01T09:00:00Z"
//!         end: "2025-05-01T10:00:00Z"
//! ```

pub mod clock;
pub mod config;
pub mod date;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod headers;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LifecycleConfig;
pub use date::{normalize, DateInput};
pub use engine::LifecycleEngine;
pub use error::{DateParseError, LifecycleError, PolicyValidationError, TelemetryCallbackError};
pub use evaluator::{evaluate, Action, Decision, HeaderField};
pub use headers::{render, HeaderList, RenderedResponse};
pub use policy::{BrownoutWindow, DeprecationPolicy, OverrideResponse};
pub use registry::{PolicyRegistry, PolicyResolver};
pub use schema::{annotate, AnnotationReport, SchemaDocument, SchemaTree};
pub use telemetry::{RequestDescriptor, TelemetryContext, TelemetryDispatcher, TelemetrySink};
