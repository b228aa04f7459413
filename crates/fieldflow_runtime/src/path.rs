//! Execution paths.
//!
//! Every error and every incremental payload is tagged with the path of the
//! result-tree position it belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// The position of a node in the result tree.
///
/// Paths are values: `child` and `index` return a new path and leave the
/// receiver untouched, so sibling branches never share one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionPath(Vec<PathSegment>);

impl ExecutionPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns this path extended with a response key.
    #[must_use]
    pub fn child(&self, key: impl Into<String>) -> Self {
        self.push(PathSegment::Field(key.into()))
    }

    /// Returns this path extended with a list index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.push(PathSegment::Index(index))
    }

    fn push(&self, segment: PathSegment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(segment);
        Self(segments)
    }

    /// Returns the parent path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .split_last()
            .map(|(_, parent)| Self(parent.to_vec()))
    }

    /// Returns the last segment.
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `other` is this path or lies below it.
    pub fn contains(&self, other: &ExecutionPath) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl FromIterator<PathSegment> for ExecutionPath {
    fn from_iter<T: IntoIterator<Item = PathSegment>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<PathSegment>> for ExecutionPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            match segment {
                PathSegment::Field(name) => write!(f, "/{name}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}
