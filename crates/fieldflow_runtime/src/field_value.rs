//! How a field's value will complete.
//!
//! A [`FieldValueInfo`] is produced as soon as a field's raw value is
//! fetched. It exposes the shape of the completion (null, scalar, object,
//! list) while nested work is still running, which is what instrumentation
//! observes before any value is awaited.

use crate::classifier::{Classification, FieldFailure};
use crate::combinator::join_ordered;
use crate::context::ExecutionContext;
use crate::path::ExecutionPath;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;

/// An object in the result tree, keys in selection order.
pub type ObjectValue = serde_json::Map<String, Value>;

/// Result of completing one field.
pub type FieldResult = Result<Value, FieldFailure>;

/// The kind of value a field completes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteValueType {
    Null,
    Scalar,
    Object,
    List,
}

enum Completion {
    Ready(FieldResult),
    Started(JoinHandle<FieldResult>),
    List {
        items: Vec<FieldValueInfo>,
        nullable: bool,
        ctx: ExecutionContext,
    },
}

/// The started completion of one field or list element.
pub struct FieldValueInfo {
    kind: CompleteValueType,
    path: ExecutionPath,
    completion: Completion,
}

impl FieldValueInfo {
    /// A known null.
    pub(crate) fn null(path: ExecutionPath) -> Self {
        Self::ready(CompleteValueType::Null, path, Ok(Value::Null))
    }

    /// A null at a non-nullable position, or any other already known
    /// failure.
    pub(crate) fn failed(path: ExecutionPath, failure: FieldFailure) -> Self {
        Self::ready(CompleteValueType::Null, path, Err(failure))
    }

    pub(crate) fn scalar(path: ExecutionPath, value: Value) -> Self {
        Self::ready(CompleteValueType::Scalar, path, Ok(value))
    }

    /// An object whose nested selection is already running.
    pub(crate) fn object(path: ExecutionPath, task: JoinHandle<FieldResult>) -> Self {
        Self {
            kind: CompleteValueType::Object,
            path,
            completion: Completion::Started(task),
        }
    }

    /// A list of element completions. A bubble from a non-nullable element
    /// is offered to the list itself according to `nullable`.
    pub(crate) fn list(
        path: ExecutionPath,
        items: Vec<FieldValueInfo>,
        nullable: bool,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            kind: CompleteValueType::List,
            path,
            completion: Completion::List {
                items,
                nullable,
                ctx,
            },
        }
    }

    fn ready(kind: CompleteValueType, path: ExecutionPath, result: FieldResult) -> Self {
        Self {
            kind,
            path,
            completion: Completion::Ready(result),
        }
    }

    pub fn kind(&self) -> CompleteValueType {
        self.kind
    }

    pub fn path(&self) -> &ExecutionPath {
        &self.path
    }

    /// Element infos of a list, empty for every other kind.
    pub fn list_infos(&self) -> &[FieldValueInfo] {
        match &self.completion {
            Completion::List { items, .. } => items,
            _ => &[],
        }
    }

    /// Waits for the completed value.
    pub fn into_value(self) -> BoxFuture<'static, FieldResult> {
        let Self { path, completion, .. } = self;
        Box::pin(async move {
            match completion {
                Completion::Ready(result) => result,
                Completion::Started(task) => task.await?,
                Completion::List {
                    items,
                    nullable,
                    ctx,
                } => {
                    match join_ordered(items.into_iter().map(FieldValueInfo::into_value)).await {
                        Ok(values) => Ok(Value::Array(values)),
                        Err(FieldFailure::Bubble(bubble)) => match bubble.absorb_or_raise(nullable) {
                            Classification::Recoverable(error) => {
                                ctx.errors().push(error);
                                ctx.incremental().discard(&path);
                                Ok(Value::Null)
                            }
                            Classification::Propagate(bubble) => Err(FieldFailure::Bubble(bubble)),
                        },
                        Err(failure) => Err(failure),
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for FieldValueInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldValueInfo")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("list_infos", &self.list_infos())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NullBubble;
    use crate::context::Context;
    use crate::error::FieldError;

    fn context() -> ExecutionContext {
        ExecutionContext::builder(Context::new()).build()
    }

    fn bubble_at(path: &ExecutionPath) -> FieldFailure {
        FieldFailure::Bubble(NullBubble::new(path.clone(), FieldError::non_null(path)))
    }

    #[tokio::test]
    async fn test_list_joins_in_order() {
        let path = ExecutionPath::root().child("tags");
        let items = vec![
            FieldValueInfo::scalar(path.index(0), Value::from("a")),
            FieldValueInfo::null(path.index(1)),
            FieldValueInfo::object(
                path.index(2),
                tokio::spawn(async { Ok(serde_json::json!({"x": 1})) }),
            ),
        ];
        let info = FieldValueInfo::list(path, items, true, context());

        assert_eq!(info.kind(), CompleteValueType::List);
        assert_eq!(info.list_infos().len(), 3);
        assert_eq!(
            info.into_value().await,
            Ok(serde_json::json!(["a", null, {"x": 1}]))
        );
    }

    #[tokio::test]
    async fn test_nullable_list_absorbs_element_bubble() {
        let ctx = context();
        let path = ExecutionPath::root().child("tags");
        let items = vec![
            FieldValueInfo::scalar(path.index(0), Value::from("a")),
            FieldValueInfo::failed(path.index(1), bubble_at(&path.index(1))),
        ];
        let info = FieldValueInfo::list(path.clone(), items, true, ctx.clone());

        assert_eq!(info.into_value().await, Ok(Value::Null));
        let recorded = ctx.errors().take();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].path, Some(path.index(1)));
        assert!(ctx.incremental().is_discarded(&path.index(0)));
    }

    #[tokio::test]
    async fn test_non_null_list_raises_element_bubble() {
        let ctx = context();
        let path = ExecutionPath::root().child("tags");
        let items = vec![FieldValueInfo::failed(path.index(0), bubble_at(&path.index(0)))];
        let info = FieldValueInfo::list(path.clone(), items, false, ctx.clone());

        match info.into_value().await {
            Err(FieldFailure::Bubble(bubble)) => assert_eq!(bubble.path(), &path.index(0)),
            other => panic!("Expected bubble, got {other:?}"),
        }
        assert!(ctx.errors().is_empty());
        // Whoever absorbs the bubble discards the position.
        assert!(!ctx.incremental().is_discarded(&path));
    }
}
