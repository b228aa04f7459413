//! Error records and internal execution failures.

use crate::path::ExecutionPath;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::task::JoinError;

/// A field error, as delivered in a result's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// The path to the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<ExecutionPath>,
    /// Error extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<IndexMap<String, serde_json::Value>>,
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// The error recorded when a non-nullable position receives null.
    pub fn non_null(path: &ExecutionPath) -> Self {
        Self::new(format!(
            "Cannot return null for non-nullable field at '{path}'"
        ))
        .with_path(path.clone())
        .with_code("NON_NULL_VIOLATION")
    }

    /// Adds a path to the error.
    pub fn with_path(mut self, path: ExecutionPath) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", serde_json::Value::String(code.into()))
    }

    /// Returns the `code` extension, if any.
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(serde_json::Value::as_str)
    }
}

/// A failure that did not originate from a resolver.
///
/// These never become `null` in the result; they fail the enclosing
/// execution and surface as an `INTERNAL_ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// A spawned field task panicked or was cancelled by the runtime.
    #[error("Field task failed: {0}")]
    TaskFailed(String),

    /// A strategy invocation was dropped before it completed.
    #[error("Execution was abandoned before completion")]
    Abandoned,

    /// Any other defect while combining results.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Converts this failure into the error record reported to clients.
    pub fn to_field_error(&self) -> FieldError {
        FieldError::new(self.to_string()).with_code("INTERNAL_ERROR")
    }
}

impl From<JoinError> for ExecutionError {
    fn from(error: JoinError) -> Self {
        if error.is_panic() {
            Self::TaskFailed("task panicked".to_string())
        } else {
            Self::TaskFailed(error.to_string())
        }
    }
}

#[derive(Debug, Default)]
struct SinkState {
    errors: Vec<FieldError>,
    paths: FxHashSet<ExecutionPath>,
}

/// Accumulates the errors of one execution unit.
///
/// Errors keep the order in which they are pushed, which is the order their
/// owning fields complete. At most one error is kept per path.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    state: Arc<Mutex<SinkState>>,
}

impl ErrorSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error. Returns false if an error for the same path was
    /// already recorded.
    pub fn push(&self, error: FieldError) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = &error.path {
            if !state.paths.insert(path.clone()) {
                return false;
            }
        }
        state.errors.push(error);
        true
    }

    /// Removes and returns every recorded error.
    pub fn take(&self) -> Vec<FieldError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.paths.clear();
        std::mem::take(&mut state.errors)
    }

    /// Returns the number of recorded errors.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .errors
            .len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
