//! Pluggable payload validation.
//!
//! The catalog never depends on a specific schema library; it consumes the
//! [`Schema`] capability and renders the issues it reports. A
//! `jsonschema`-backed implementation ships behind the `json-schema` feature,
//! and plain functions implement the capability directly for hand-rolled
//! validators.

use serde_json::Value;

/// One step in the path from a payload root to an offending value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// An object member.
    Key(String),
    /// An array element.
    Index(usize),
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Path from the payload root to the offending value; empty for
    /// root-level findings.
    pub path: Vec<PathSegment>,
    /// Human-readable description of the finding.
    pub message: String,
}

impl Issue {
    /// A root-level issue.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    /// An issue located at `path`.
    pub fn at(path: Vec<PathSegment>, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

/// Capability to validate a structured payload.
pub trait Schema: Send + Sync {
    /// Check `value`, reporting every finding on failure.
    fn parse(&self, value: &Value) -> Result<(), Vec<Issue>>;
}

impl<F> Schema for F
where
    F: Fn(&Value) -> Result<(), Vec<Issue>> + Send + Sync,
{
    fn parse(&self, value: &Value) -> Result<(), Vec<Issue>> {
        self(value)
    }
}

/// Render issues into human-readable lines: leading `✖` marker, sorted by
/// path depth ascending, paths in dotted notation with bracket-escaping of
/// keys containing `.`.
pub fn render_issues(issues: &[Issue]) -> Vec<String> {
    let mut sorted: Vec<&Issue> = issues.iter().collect();
    sorted.sort_by_key(|issue| issue.path.len());
    sorted
        .into_iter()
        .map(|issue| {
            if issue.path.is_empty() {
                format!("✖ {}", issue.message)
            } else {
                format!("✖ {}\n  → at {}", issue.message, render_path(&issue.path))
            }
        })
        .collect()
}

fn render_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for (position, segment) in path.iter().enumerate() {
        match segment {
            PathSegment::Index(index) => out.push_str(&format!("[{index}]")),
            PathSegment::Key(key) if key.contains('.') => {
                out.push_str(&format!("[\"{key}\"]"));
            }
            PathSegment::Key(key) => {
                if position > 0 {
                    out.push('.');
                }
                out.push_str(key);
            }
        }
    }
    out
}

/// `jsonschema`-backed [`Schema`] implementation.
#[cfg(feature = "json-schema")]
pub mod json {
    use super::{Issue, PathSegment, Schema};
    use serde_json::Value;

    /// A compiled JSON Schema.
    pub struct JsonSchema {
        validator: jsonschema::Validator,
    }

    impl JsonSchema {
        /// Compile a schema document.
        pub fn compile(schema: &Value) -> anyhow::Result<Self> {
            let validator = jsonschema::validator_for(schema)
                .map_err(|error| anyhow::anyhow!("invalid schema: {error}"))?;
            Ok(Self { validator })
        }
    }

    impl std::fmt::Debug for JsonSchema {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("JsonSchema").finish_non_exhaustive()
        }
    }

    impl Schema for JsonSchema {
        fn parse(&self, value: &Value) -> Result<(), Vec<Issue>> {
            let issues: Vec<Issue> = self
                .validator
                .iter_errors(value)
                .map(|error| Issue {
                    path: pointer_segments(&error.instance_path.to_string()),
                    message: error.to_string(),
                })
                .collect();
            if issues.is_empty() {
                Ok(())
            } else {
                Err(issues)
            }
        }
    }

    /// Split a JSON pointer (`/name/0/given`) into path segments, unescaping
    /// `~1`/`~0` and classifying all-digit tokens as array indices.
    fn pointer_segments(pointer: &str) -> Vec<PathSegment> {
        pointer
            .split('/')
            .skip(1)
            .map(|token| {
                let token = token.replace("~1", "/").replace("~0", "~");
                match token.parse::<usize>() {
                    Ok(index) if !token.is_empty() => PathSegment::Index(index),
                    _ => PathSegment::Key(token),
                }
            })
            .collect()
    }

}
