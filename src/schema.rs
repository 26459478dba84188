//! OpenAPI annotation for lifecycle policies.
//!
//! Schemas form a tree: every [`SchemaDocument`] may mount other documents
//! under a path prefix, the way sub-applications are mounted. The tree is an
//! arena addressed by [`NodeId`], so one document can be mounted at several
//! prefixes, or even mount one of its own ancestors.
//!
//! [`annotate`] walks the tree once and updates each operation whose policy
//! has taken effect:
//!
//! - reached deprecation or sunset: `deprecated: true` plus a
//!   `**DEPRECATED**` note in the description,
//! - deprecation still in the future: `deprecated` untouched and an
//!   `**UPCOMING DEPRECATION**` note instead.
//!
//! Both notes are added at most once, so repeated runs at the same instant
//! leave the documents byte-for-byte unchanged.

use crate::policy::{DeprecationPolicy, DEPRECATION_REL};
use crate::registry::PolicyResolver;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Marker opening the note on deprecated operations.
pub const DEPRECATED_MARKER: &str = "**DEPRECATED**";

/// Marker opening the note on operations with a future deprecation.
pub const UPCOMING_MARKER: &str = "**UPCOMING DEPRECATION**";

const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

static UPCOMING_NOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\n\n)?\*\*UPCOMING DEPRECATION\*\*[^\n]*").expect("valid upcoming note regex")
});

/// One OpenAPI document. Everything outside `paths` is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDocument {
    openapi: Value,
}

impl SchemaDocument {
    /// Empty OpenAPI 3.1 document.
    pub fn new(title: &str) -> Self {
        Self {
            openapi: serde_json::json!({
                "openapi": "3.1.0",
                "info": { "title": title, "version": "1.0.0" },
                "paths": {},
            }),
        }
    }

    pub fn from_value(openapi: Value) -> Self {
        Self { openapi }
    }

    pub fn as_value(&self) -> &Value {
        &self.openapi
    }

    pub fn into_value(self) -> Value {
        self.openapi
    }

    /// Insert or replace an operation object under `paths[path][method]`.
    pub fn add_operation(&mut self, method: &str, path: &str, operation: Value) {
        let Some(root) = self.openapi.as_object_mut() else {
            return;
        };
        let paths = root
            .entry("paths")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(paths) = paths.as_object_mut() {
            let item = paths
                .entry(path.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(item) = item.as_object_mut() {
                item.insert(method.to_ascii_lowercase(), operation);
            }
        }
    }

    /// Look up an operation object.
    pub fn operation(&self, method: &str, path: &str) -> Option<&Value> {
        self.openapi
            .get("paths")?
            .get(path)?
            .get(method.to_ascii_lowercase())
    }

    /// Every `(path, method, operation)` in the document.
    fn operations_mut(&mut self) -> Vec<(String, String, &mut Map<String, Value>)> {
        let Some(paths) = self.openapi.get_mut("paths").and_then(Value::as_object_mut) else {
            return Vec::new();
        };

        let mut operations = Vec::new();
        for (path, item) in paths.iter_mut() {
            let Some(item) = item.as_object_mut() else {
                continue;
            };
            for (method, operation) in item.iter_mut() {
                if !HTTP_METHODS.contains(&method.as_str()) {
                    continue;
                }
                if let Some(operation) = operation.as_object_mut() {
                    operations.push((path.clone(), method.clone(), operation));
                }
            }
        }
        operations
    }
}

/// Handle to a document inside a [`SchemaTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A child document mounted under a path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub prefix: String,
    pub node: NodeId,
}

#[derive(Debug, Clone)]
struct SchemaNode {
    document: SchemaDocument,
    mounts: Vec<Mount>,
}

/// Arena of schema documents and the mounts between them.
#[derive(Debug, Clone, Default)]
pub struct SchemaTree {
    nodes: Vec<SchemaNode>,
}

impl SchemaTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, document: SchemaDocument) -> NodeId {
        self.nodes.push(SchemaNode {
            document,
            mounts: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Mount `child` under `prefix` inside `parent`. Returns false for unknown nodes.
    pub fn mount(&mut self, parent: NodeId, prefix: &str, child: NodeId) -> bool {
        if child.0 >= self.nodes.len() {
            return false;
        }
        match self.nodes.get_mut(parent.0) {
            Some(node) => {
                node.mounts.push(Mount {
                    prefix: prefix.to_string(),
                    node: child,
                });
                true
            }
            None => false,
        }
    }

    pub fn document(&self, id: NodeId) -> Option<&SchemaDocument> {
        self.nodes.get(id.0).map(|node| &node.document)
    }

    pub fn document_mut(&mut self, id: NodeId) -> Option<&mut SchemaDocument> {
        self.nodes.get_mut(id.0).map(|node| &mut node.document)
    }

    pub fn mounts(&self, id: NodeId) -> &[Mount] {
        self.nodes
            .get(id.0)
            .map(|node| node.mounts.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Counts from one [`annotate`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationReport {
    /// Distinct (document, effective prefix) pairs processed
    pub documents_visited: usize,
    pub operations_resolved: usize,
    pub marked_deprecated: usize,
    pub marked_upcoming: usize,
    /// Mounts not followed because they lead back to an ancestor
    pub cycles_skipped: usize,
}

struct Frame {
    node: NodeId,
    prefix: String,
    ancestry: Vec<NodeId>,
}

enum Change {
    None,
    Deprecated,
    Upcoming,
}

/// Annotate every operation reachable from `root` according to its policy at `now`.
pub fn annotate<R>(
    tree: &mut SchemaTree,
    root: NodeId,
    resolver: &R,
    now: DateTime<Utc>,
) -> AnnotationReport
where
    R: PolicyResolver + ?Sized,
{
    let mut report = AnnotationReport::default();
    let mut visited: HashSet<(NodeId, String)> = HashSet::new();
    let mut stack = vec![Frame {
        node: root,
        prefix: String::new(),
        ancestry: Vec::new(),
    }];

    while let Some(frame) = stack.pop() {
        if !visited.insert((frame.node, frame.prefix.clone())) {
            continue;
        }
        let Some(node) = tree.nodes.get_mut(frame.node.0) else {
            warn!(node = frame.node.0, "Schema node not found, skipping");
            continue;
        };

        report.documents_visited += 1;
        annotate_document(&mut node.document, &frame.prefix, resolver, now, &mut report);

        let mut ancestry = frame.ancestry;
        ancestry.push(frame.node);

        // Reversed so mounts are processed in declaration order.
        for mount in node.mounts.iter().rev() {
            if ancestry.contains(&mount.node) {
                debug!(prefix = %mount.prefix, "Schema mount cycle, not following");
                report.cycles_skipped += 1;
                continue;
            }
            stack.push(Frame {
                node: mount.node,
                prefix: join_path(&frame.prefix, &mount.prefix),
                ancestry: ancestry.clone(),
            });
        }
    }

    debug!(
        documents = report.documents_visited,
        deprecated = report.marked_deprecated,
        upcoming = report.marked_upcoming,
        "Schema annotation finished"
    );
    report
}

fn annotate_document<R>(
    document: &mut SchemaDocument,
    prefix: &str,
    resolver: &R,
    now: DateTime<Utc>,
    report: &mut AnnotationReport,
) where
    R: PolicyResolver + ?Sized,
{
    for (path, method, operation) in document.operations_mut() {
        let full_path = join_path(prefix, &path);
        let Some(policy) = resolver.resolve(&method.to_ascii_uppercase(), &full_path) else {
            continue;
        };
        report.operations_resolved += 1;

        match annotate_operation(operation, &policy, now) {
            Change::Deprecated => report.marked_deprecated += 1,
            Change::Upcoming => report.marked_upcoming += 1,
            Change::None => {}
        }
    }
}

fn annotate_operation(
    operation: &mut Map<String, Value>,
    policy: &DeprecationPolicy,
    now: DateTime<Utc>,
) -> Change {
    let description = operation
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if policy.is_deprecated(now) || policy.is_past_sunset(now) {
        let mut changed = false;
        if operation.get("deprecated") != Some(&Value::Bool(true)) {
            operation.insert("deprecated".to_string(), Value::Bool(true));
            changed = true;
        }

        let stripped = UPCOMING_NOTE.replace_all(&description, "").into_owned();
        let updated = if stripped.contains(DEPRECATED_MARKER) {
            stripped
        } else {
            append_note(&stripped, &deprecated_note(policy))
        };
        if updated != description {
            operation.insert("description".to_string(), Value::String(updated));
            changed = true;
        }

        return if changed { Change::Deprecated } else { Change::None };
    }

    match policy.deprecation_at() {
        Some(at) if at > now && !description.contains(UPCOMING_MARKER) => {
            let note = format!("{}: scheduled for {}.", UPCOMING_MARKER, iso(at));
            operation.insert(
                "description".to_string(),
                Value::String(append_note(&description, &note)),
            );
            Change::Upcoming
        }
        _ => Change::None,
    }
}

fn deprecated_note(policy: &DeprecationPolicy) -> String {
    let mut parts = vec![DEPRECATED_MARKER.to_string()];
    if let Some(at) = policy.deprecation_at() {
        parts.push(format!("Deprecated since {}.", iso(at)));
    }
    if let Some(at) = policy.sunset_at() {
        parts.push(format!("Sunset date: {}.", iso(at)));
    }
    if let Some(alternative) = policy.alternative() {
        parts.push(format!("Alternative: {}.", alternative));
    }
    if let Some(docs) = policy.link(DEPRECATION_REL) {
        parts.push(format!("See: {}.", docs));
    }
    parts.join(" ")
}

fn append_note(description: &str, note: &str) -> String {
    if description.is_empty() {
        note.to_string()
    } else {
        format!("{}\n\n{}", description, note)
    }
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Join a mount prefix and a local path into an effective path.
fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if path.is_empty() {
        return prefix.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", prefix, path)
    } else {
        format!("{}/{}", prefix, path)
    }
}
