//! Top-level execution.

use crate::classifier::{ExceptionHandler, FieldFailure, SimpleExceptionHandler};
use crate::context::{Context, ExecutionContext};
use crate::error::FieldError;
use crate::incremental::IncrementalStream;
use crate::instrumentation::{Instrumentation, InstrumentationPipeline, TracingInstrumentation};
use crate::path::ExecutionPath;
use crate::selection::SelectionSet;
use crate::strategy::SelectionResolver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Split off deferred fields and deliver them incrementally.
    pub enable_incremental_delivery: bool,
    /// Enable tracing.
    pub tracing: bool,
}

/// The executor.
#[derive(Clone)]
pub struct Executor {
    config: ExecutorConfig,
    instrumentation: InstrumentationPipeline,
    exception_handler: Arc<dyn ExceptionHandler>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("instrumentation", &self.instrumentation)
            .finish()
    }
}

impl Executor {
    /// Creates a new executor.
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Creates an executor with configuration.
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            instrumentation: InstrumentationPipeline::new(),
            exception_handler: Arc::new(SimpleExceptionHandler),
        }
    }

    /// Registers an observer. Observers see entry events in registration
    /// order and completion events in reverse.
    pub fn with_instrumentation(mut self, observer: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation.push(observer);
        self
    }

    /// Replaces the handler that turns resolver errors into error records.
    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes `selection_set` against `root`, resolving every field in
    /// the initial result. Deferral markers are ignored.
    pub async fn execute(
        &self,
        selection_set: &SelectionSet,
        root: Value,
        ctx: &Context,
    ) -> ExecutionResult {
        let config = ExecutorConfig {
            enable_incremental_delivery: false,
            ..self.config.clone()
        };
        let exec_ctx = self.execution_context(ctx, config);
        resolve_root(&exec_ctx, selection_set, root).await
    }

    /// Executes `selection_set` with incremental delivery.
    ///
    /// The initial result never waits for deferred fields; those arrive
    /// through the returned stream. With incremental delivery disabled in
    /// the config this is [`execute`](Self::execute) with an empty stream.
    pub async fn execute_incremental(
        &self,
        selection_set: &SelectionSet,
        root: Value,
        ctx: &Context,
    ) -> IncrementalExecutionResult {
        let exec_ctx = self.execution_context(ctx, self.config.clone());
        let initial = resolve_root(&exec_ctx, selection_set, root).await;
        let incremental = IncrementalStream::new(exec_ctx.incremental().clone());

        IncrementalExecutionResult {
            initial,
            has_next: incremental.has_next(),
            incremental,
        }
    }

    fn execution_context(&self, ctx: &Context, config: ExecutorConfig) -> ExecutionContext {
        let mut instrumentation = self.instrumentation.clone();
        if config.tracing {
            instrumentation.push(Arc::new(TracingInstrumentation));
        }
        ExecutionContext::builder(ctx.clone())
            .config(config)
            .instrumentation(instrumentation)
            .exception_handler(Arc::clone(&self.exception_handler))
            .build()
    }
}

/// Resolves the root selection and folds every failure into the result.
async fn resolve_root(
    ctx: &ExecutionContext,
    selection_set: &SelectionSet,
    root: Value,
) -> ExecutionResult {
    let task = tokio::spawn(SelectionResolver::resolve(
        ctx.clone(),
        ExecutionPath::root(),
        selection_set.clone(),
        root,
    ));
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(join_error) => Err(FieldFailure::from(join_error)),
    };

    let data = match outcome {
        Ok(object) => Some(Value::Object(object)),
        Err(FieldFailure::Bubble(bubble)) => {
            ctx.errors().push(bubble.into_error());
            ctx.incremental().discard(&ExecutionPath::root());
            Some(Value::Null)
        }
        Err(FieldFailure::Internal(error)) => {
            tracing::error!(%error, "execution failed");
            ctx.errors().push(error.to_field_error());
            ctx.incremental().discard(&ExecutionPath::root());
            None
        }
    };

    ExecutionResult {
        data,
        errors: ctx.errors().take(),
    }
}

/// The result of one execution unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The data. Absent when execution failed internally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// The errors, in the order their fields completed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl ExecutionResult {
    /// Creates a successful result with data.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Creates an error result.
    pub fn error(error: FieldError) -> Self {
        Self {
            data: None,
            errors: vec![error],
        }
    }

    /// Returns true if the result has errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns true if the result has data.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// The initial result of an incremental execution plus its pending
/// payloads.
#[derive(Debug)]
pub struct IncrementalExecutionResult {
    pub initial: ExecutionResult,
    /// Whether any payload follows the initial result.
    pub has_next: bool,
    pub incremental: IncrementalStream,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverError;
    use crate::selection::{Field, FieldType};
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_execute_simple_query() {
        let selection = SelectionSet::new().with_field(
            Field::new("user")
                .resolve_fn(|_parent, _args, _ctx, _info| Ok(json!({"id": "1", "name": "Alice"})))
                .selection(
                    SelectionSet::new()
                        .with_field(Field::new("id"))
                        .with_field(Field::new("name")),
                ),
        );

        let result = Executor::new()
            .execute(&selection, json!({}), &Context::new())
            .await;

        assert!(!result.has_errors());
        assert_eq!(result.data, Some(json!({"user": {"id": "1", "name": "Alice"}})));
    }

    #[tokio::test]
    async fn test_execute_with_arguments() {
        let selection = SelectionSet::new().with_field(
            Field::new("user")
                .argument("id", json!("42"))
                .resolve_fn(|_parent, args, _ctx, _info| {
                    let id: String = args.require("id")?;
                    Ok(json!({"id": id, "name": "User"}))
                })
                .selection(SelectionSet::new().with_field(Field::new("id"))),
        );

        let result = Executor::new()
            .execute(&selection, json!({}), &Context::new())
            .await;

        assert_eq!(result.data.unwrap()["user"]["id"], "42");
    }

    #[tokio::test]
    async fn test_execute_with_error() {
        let selection = SelectionSet::new().with_field(Field::new("user").resolve_fn(
            |_parent, _args, _ctx, _info| Err(ResolverError::Custom("User not found".to_string())),
        ));

        let result = Executor::new()
            .execute(&selection, json!({}), &Context::new())
            .await;

        assert_eq!(result.data, Some(json!({"user": null})));
        assert!(result.has_errors());
        assert!(result.errors[0].message.contains("User not found"));
    }

    #[tokio::test]
    async fn test_execute_list_field() {
        let selection = SelectionSet::new().with_field(
            Field::new("users")
                .ty(FieldType::list(FieldType::non_null()))
                .selection(
                    SelectionSet::new()
                        .with_field(Field::new("id"))
                        .with_field(Field::new("name")),
                ),
        );
        let root = json!({"users": [
            {"id": "1", "name": "Alice"},
            {"id": "2", "name": "Bob"}
        ]});

        let result = Executor::new().execute(&selection, root, &Context::new()).await;

        let data = result.data.unwrap();
        let users = data["users"].as_array().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["id"], "1");
        assert_eq!(users[1]["name"], "Bob");
    }

    #[tokio::test]
    async fn test_root_bubble_nulls_data() {
        let selection = SelectionSet::new()
            .with_field(Field::new("id").non_null())
            .with_field(Field::new("name"));

        let result = Executor::new()
            .execute(&selection, json!({"name": "x"}), &Context::new())
            .await;

        assert_eq!(result.data, Some(Value::Null));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code(), Some("NON_NULL_VIOLATION"));
    }

    #[tokio::test]
    async fn test_context_reaches_resolvers() {
        let mut ctx = Context::new();
        ctx.set("viewer", "ann");
        let selection = SelectionSet::new().with_field(Field::new("me").resolve_fn(
            |_parent, _args, ctx, _info| Ok(json!(ctx.get::<String>("viewer"))),
        ));

        let result = Executor::new().execute(&selection, json!({}), &ctx).await;
        assert_eq!(result.data, Some(json!({"me": "ann"})));
    }

    #[tokio::test]
    async fn test_execute_ignores_deferral() {
        let selection = SelectionSet::new()
            .with_field(Field::new("a"))
            .with_field(Field::new("b").defer(None));
        let executor = Executor::with_config(ExecutorConfig {
            enable_incremental_delivery: true,
            tracing: false,
        });

        let result = executor
            .execute(&selection, json!({"a": 1, "b": 2}), &Context::new())
            .await;
        assert_eq!(result.data, Some(json!({"a": 1, "b": 2})));
    }

    #[tokio::test]
    async fn test_execute_incremental_disabled() {
        let selection = SelectionSet::new()
            .with_field(Field::new("a"))
            .with_field(Field::new("b").defer(None));

        let result = Executor::new()
            .execute_incremental(&selection, json!({"a": 1, "b": 2}), &Context::new())
            .await;

        assert!(!result.has_next);
        assert_eq!(result.initial.data, Some(json!({"a": 1, "b": 2})));
        assert_eq!(result.incremental.collect::<Vec<_>>().await.len(), 0);
    }

    #[tokio::test]
    async fn test_execute_incremental() {
        let selection = SelectionSet::new()
            .with_field(Field::new("a"))
            .with_field(Field::new("b").defer(Some("later".to_string())));
        let executor = Executor::with_config(ExecutorConfig {
            enable_incremental_delivery: true,
            tracing: true,
        });

        let result = executor
            .execute_incremental(&selection, json!({"a": 1, "b": 2}), &Context::new())
            .await;

        assert!(result.has_next);
        assert_eq!(result.initial.data, Some(json!({"a": 1})));

        let payloads: Vec<_> = result.incremental.collect().await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].path, ExecutionPath::root().child("b"));
        assert_eq!(payloads[0].label.as_deref(), Some("later"));
        assert_eq!(payloads[0].data, json!({"b": 2}));
        assert!(!payloads[0].has_next);
    }

    #[tokio::test]
    async fn test_root_bubble_drops_deferred_units() {
        let selection = SelectionSet::new()
            .with_field(Field::new("id").non_null())
            .with_field(Field::new("bio").defer(None));
        let executor = Executor::with_config(ExecutorConfig {
            enable_incremental_delivery: true,
            tracing: false,
        });

        let result = executor
            .execute_incremental(&selection, json!({"bio": "hi"}), &Context::new())
            .await;

        assert_eq!(result.initial.data, Some(Value::Null));
        assert!(!result.has_next);
        assert!(result.incremental.collect::<Vec<_>>().await.is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config: ExecutorConfig = serde_json::from_value(json!({"tracing": true})).unwrap();
        assert!(config.tracing);
        assert!(!config.enable_incremental_delivery);

        let config: ExecutorConfig =
            serde_json::from_value(json!({"enableIncrementalDelivery": true})).unwrap();
        assert!(config.enable_incremental_delivery);
    }

    #[test]
    fn test_result_serialization() {
        let result = ExecutionResult::data(json!({"hello": "world"}));
        assert!(result.has_data());
        assert!(!result.has_errors());
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"data": {"hello": "world"}})
        );

        let result = ExecutionResult::error(FieldError::new("Error"));
        assert!(!result.has_data());
        assert!(result.has_errors());
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"errors": [{"message": "Error"}]})
        );
    }
}
