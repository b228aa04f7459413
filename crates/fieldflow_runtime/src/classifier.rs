//! Deciding what a failed field does to its parent.
//!
//! A failure at a nullable position is recoverable: the error is recorded
//! and the value becomes null. At a non-nullable position it turns into a
//! [`NullBubble`] that climbs until a nullable ancestor absorbs it.

use crate::error::{ExecutionError, FieldError};
use crate::path::ExecutionPath;
use crate::resolver::ResolverError;
use crate::selection::Field;
use tokio::task::JoinError;

/// A non-nullable position at `path` received null.
///
/// Carries the single error record describing why; the record is written
/// once, by whichever ancestor absorbs the bubble.
#[derive(Debug, Clone, PartialEq)]
pub struct NullBubble {
    path: ExecutionPath,
    error: FieldError,
}

impl NullBubble {
    pub fn new(path: ExecutionPath, error: FieldError) -> Self {
        Self { path, error }
    }

    /// The position that originated the bubble.
    pub fn path(&self) -> &ExecutionPath {
        &self.path
    }

    pub fn error(&self) -> &FieldError {
        &self.error
    }

    pub fn into_error(self) -> FieldError {
        self.error
    }

    /// Offers the bubble to a position with the given nullability.
    pub fn absorb_or_raise(self, nullable: bool) -> Classification {
        classify(self.error, nullable, &self.path)
    }
}

/// Why a field could not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFailure {
    /// A null climbing towards the nearest nullable ancestor.
    Bubble(NullBubble),
    /// A defect outside any resolver.
    Internal(ExecutionError),
}

impl FieldFailure {
    /// The error record reported when this failure ends an execution unit.
    pub fn into_error(self) -> FieldError {
        match self {
            Self::Bubble(bubble) => bubble.into_error(),
            Self::Internal(error) => error.to_field_error(),
        }
    }

    pub fn is_bubble(&self) -> bool {
        matches!(self, Self::Bubble(_))
    }
}

impl From<ExecutionError> for FieldFailure {
    fn from(error: ExecutionError) -> Self {
        Self::Internal(error)
    }
}

impl From<JoinError> for FieldFailure {
    fn from(error: JoinError) -> Self {
        Self::Internal(error.into())
    }
}

impl From<NullBubble> for FieldFailure {
    fn from(bubble: NullBubble) -> Self {
        Self::Bubble(bubble)
    }
}

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Record the error and continue with null.
    Recoverable(FieldError),
    /// Abandon the parent node.
    Propagate(NullBubble),
}

/// The one branch point for null propagation.
///
/// Used for resolver errors, nulls at non-null positions, malformed list
/// values and bubbles arriving from nested completions alike.
pub fn classify(mut error: FieldError, nullable: bool, path: &ExecutionPath) -> Classification {
    if error.path.is_none() {
        error.path = Some(path.clone());
    }
    if nullable {
        Classification::Recoverable(error)
    } else {
        Classification::Propagate(NullBubble::new(path.clone(), error))
    }
}

/// Input to an [`ExceptionHandler`].
pub struct ExceptionHandlerParameters<'a> {
    pub error: &'a ResolverError,
    pub field: &'a Field,
    pub path: &'a ExecutionPath,
}

/// Turns a resolver error into the error record reported to clients.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, params: ExceptionHandlerParameters<'_>) -> FieldError;
}

/// Records the resolver's message with its path and error code.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleExceptionHandler;

impl ExceptionHandler for SimpleExceptionHandler {
    fn handle(&self, params: ExceptionHandlerParameters<'_>) -> FieldError {
        tracing::warn!(
            path = %params.path,
            field = params.field.name(),
            error = %params.error,
            "resolver failed"
        );
        FieldError::new(params.error.to_string())
            .with_path(params.path.clone())
            .with_code(params.error.code())
    }
}
