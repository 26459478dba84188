//! Explicit mapping from operations to lifecycle policies.
//!
//! The per-request engine and the schema annotator both look policies up
//! through [`PolicyResolver`], so a route's policy is declared once and seen
//! identically by traffic handling and by documentation.

use crate::policy::DeprecationPolicy;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maps an operation (HTTP method + full path) to its policy.
pub trait PolicyResolver {
    fn resolve(&self, method: &str, path: &str) -> Option<Arc<DeprecationPolicy>>;
}

impl<F> PolicyResolver for F
where
    F: Fn(&str, &str) -> Option<Arc<DeprecationPolicy>>,
{
    fn resolve(&self, method: &str, path: &str) -> Option<Arc<DeprecationPolicy>> {
        self(method, path)
    }
}

/// How a registered path is compared with request paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Glob if the pattern contains `*` or `?`, exact otherwise
    #[default]
    Auto,
    Exact,
    Prefix,
    Glob,
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
    Glob { pattern: String, matcher: GlobMatcher },
}

impl PathPattern {
    /// Compile a path according to `kind`.
    pub fn new(path: &str, kind: MatchKind) -> Result<Self, globset::Error> {
        let is_glob = path.contains('*') || path.contains('?');
        Ok(match kind {
            MatchKind::Exact => PathPattern::Exact(path.to_string()),
            MatchKind::Prefix => PathPattern::Prefix(path.to_string()),
            MatchKind::Auto if !is_glob => PathPattern::Exact(path.to_string()),
            MatchKind::Auto | MatchKind::Glob => PathPattern::Glob {
                pattern: path.to_string(),
                matcher: Glob::new(path)?.compile_matcher(),
            },
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(expected) => path == expected,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Glob { matcher, .. } => matcher.is_match(path),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PathPattern::Exact(p) | PathPattern::Prefix(p) => p,
            PathPattern::Glob { pattern, .. } => pattern,
        }
    }

    /// Exact beats glob beats prefix; longer patterns beat shorter ones.
    fn specificity(&self) -> (u8, usize) {
        let rank = match self {
            PathPattern::Exact(_) => 2,
            PathPattern::Glob { .. } => 1,
            PathPattern::Prefix(_) => 0,
        };
        (rank, self.as_str().len())
    }
}

/// A registered policy with the operations it applies to.
#[derive(Debug, Clone)]
pub struct PolicyEntry {
    pub id: String,
    /// Upper-case methods; empty means every method
    pub methods: Vec<String>,
    pub pattern: PathPattern,
    pub policy: Arc<DeprecationPolicy>,
}

impl PolicyEntry {
    /// Check if this entry applies to the given method and path.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        // Check method first (quick check)
        if !self.methods.is_empty() && !self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
        {
            return false;
        }

        self.pattern.matches(path)
    }
}

/// Ordered collection of policies with most-specific-wins lookup.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    entries: Vec<PolicyEntry>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy for one method on one exact path.
    pub fn register_operation(
        &mut self,
        id: impl Into<String>,
        method: &str,
        path: &str,
        policy: DeprecationPolicy,
    ) {
        self.push(
            id.into(),
            vec![method.to_ascii_uppercase()],
            PathPattern::Exact(path.to_string()),
            policy,
        );
    }

    /// Register a policy for every operation below a path prefix.
    pub fn register_prefix(&mut self, id: impl Into<String>, prefix: &str, policy: DeprecationPolicy) {
        self.push(
            id.into(),
            Vec::new(),
            PathPattern::Prefix(prefix.to_string()),
            policy,
        );
    }

    /// Register a policy with an explicit method filter and pattern.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        methods: &[String],
        pattern: PathPattern,
        policy: DeprecationPolicy,
    ) {
        let methods = methods.iter().map(|m| m.to_ascii_uppercase()).collect();
        self.push(id.into(), methods, pattern, policy);
    }

    fn push(&mut self, id: String, methods: Vec<String>, pattern: PathPattern, policy: DeprecationPolicy) {
        self.entries.push(PolicyEntry {
            id,
            methods,
            pattern,
            policy: Arc::new(policy),
        });
    }

    /// Find the most specific entry for an operation. Ties go to the first registered.
    pub fn find(&self, method: &str, path: &str) -> Option<&PolicyEntry> {
        let mut best: Option<&PolicyEntry> = None;
        for entry in self.entries.iter().filter(|e| e.matches(method, path)) {
            let better = match best {
                None => true,
                Some(current) => entry.pattern.specificity() > current.pattern.specificity(),
            };
            if better {
                best = Some(entry);
            }
        }
        best
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PolicyResolver for PolicyRegistry {
    fn resolve(&self, method: &str, path: &str) -> Option<Arc<DeprecationPolicy>> {
        self.find(method, path).map(|entry| Arc::clone(&entry.policy))
    }
}
