//! The asynchronous selection resolver.
//!
//! One invocation resolves one node of the result tree:
//!
//! 1. every non-deferred field is fetched concurrently;
//! 2. each fetched value is classified into a [`FieldValueInfo`], which
//!    starts nested object resolution right away;
//! 3. the infos are reported to instrumentation;
//! 4. the completions are joined in selection order.
//!
//! A null at a non-nullable position travels upwards as
//! [`FieldFailure::Bubble`] until a nullable field or list absorbs it. A
//! node that lets a bubble through contributes nothing else.

use crate::classifier::{classify, Classification, ExceptionHandlerParameters, FieldFailure};
use crate::combinator::{join_ordered, CombinedBuilder};
use crate::context::ExecutionContext;
use crate::error::FieldError;
use crate::field_value::{FieldValueInfo, ObjectValue};
use crate::incremental::DeferredExecutionSupport;
use crate::instrumentation::StrategyParameters;
use crate::path::ExecutionPath;
use crate::resolver::ResolverArgs;
use crate::selection::{Field, FieldType, SelectionSet};
use futures::future::BoxFuture;
use serde_json::Value;

/// Resolves selection sets against source values.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectionResolver;

impl SelectionResolver {
    /// Resolves `selection_set` at `path` with `source` as parent value.
    ///
    /// Fields flagged for deferral are split off and scheduled on the
    /// context's incremental call state when incremental delivery is
    /// enabled.
    pub fn resolve(
        ctx: ExecutionContext,
        path: ExecutionPath,
        selection_set: SelectionSet,
        source: Value,
    ) -> BoxFuture<'static, Result<ObjectValue, FieldFailure>> {
        Box::pin(async move {
            let support =
                DeferredExecutionSupport::partition(&selection_set, ctx.incremental_enabled());
            let initial = support.initial().clone();

            let params = StrategyParameters {
                path: path.clone(),
                fields: initial.keys().map(str::to_string).collect(),
            };
            let mut instrumentation = ctx.instrumentation().begin(params);

            support.schedule(&ctx, &path, &source);

            let mut fetches = CombinedBuilder::with_capacity(initial.len());
            for field in initial.iter() {
                fetches.add(fetch_field(
                    ctx.clone(),
                    path.child(field.response_key()),
                    field.clone(),
                    source.clone(),
                ));
            }
            tracing::debug!(path = %path, fields = initial.len(), "selection dispatched");
            instrumentation.dispatched();

            let outcome = async {
                let infos = fetches.await_all().await?;
                instrumentation.field_values_info(&infos);
                let values = join_ordered(infos.into_iter().map(FieldValueInfo::into_value)).await?;
                Ok::<_, FieldFailure>(
                    initial
                        .keys()
                        .map(str::to_string)
                        .zip(values)
                        .collect::<ObjectValue>(),
                )
            }
            .await;

            if let Err(failure) = &outcome {
                instrumentation.field_values_failed(failure);
                match failure {
                    FieldFailure::Bubble(bubble) => {
                        tracing::debug!(path = %path, origin = %bubble.path(), "node discarded by null bubble");
                    }
                    FieldFailure::Internal(error) => {
                        tracing::error!(path = %path, %error, "selection failed");
                    }
                }
            }
            instrumentation.complete(outcome.as_ref());
            outcome
        })
    }
}

/// Fetches the raw value of one field and classifies it.
///
/// Never fails on its own: resolver errors become recorded errors or
/// bubbles inside the returned info.
async fn fetch_field(
    ctx: ExecutionContext,
    path: ExecutionPath,
    field: Field,
    source: Value,
) -> Result<FieldValueInfo, FieldFailure> {
    let args = ResolverArgs::from_pairs(field.arguments().iter().cloned());
    let info = field.resolver_info(path.clone());

    tracing::trace!(path = %path, field = field.name(), "fetching field");
    let fetched = field
        .resolver_handle()
        .resolve(&source, &args, ctx.context(), &info)
        .await;

    let value = match fetched {
        Ok(value) => value,
        Err(error) => {
            let record = ctx.exception_handler().handle(ExceptionHandlerParameters {
                error: &error,
                field: &field,
                path: &path,
            });
            match classify(record, field.field_type().is_nullable(), &path) {
                Classification::Recoverable(record) => {
                    ctx.errors().push(record);
                    Value::Null
                }
                Classification::Propagate(bubble) => {
                    return Ok(FieldValueInfo::failed(path, bubble.into()));
                }
            }
        }
    };

    Ok(complete_value(&ctx, &field, field.field_type(), path, value))
}

/// Classifies `value` against `ty`, starting nested work where needed.
fn complete_value(
    ctx: &ExecutionContext,
    field: &Field,
    ty: &FieldType,
    path: ExecutionPath,
    value: Value,
) -> FieldValueInfo {
    if value.is_null() {
        if ty.is_nullable() {
            return FieldValueInfo::null(path);
        }
        let error = FieldError::non_null(&path);
        return match classify(error, false, &path) {
            Classification::Propagate(bubble) => FieldValueInfo::failed(path, bubble.into()),
            Classification::Recoverable(_) => FieldValueInfo::null(path),
        };
    }

    if let Some(item) = ty.item() {
        return match value {
            Value::Array(elements) => {
                let items = elements
                    .into_iter()
                    .enumerate()
                    .map(|(index, element)| complete_value(ctx, field, item, path.index(index), element))
                    .collect();
                FieldValueInfo::list(path, items, ty.is_nullable(), ctx.clone())
            }
            other => {
                let error = FieldError::new(format!(
                    "Expected a list for field '{}', found {}",
                    field.name(),
                    json_kind(&other)
                ))
                .with_code("INVALID_VALUE");
                recover_or_fail(ctx, error, ty.is_nullable(), path)
            }
        };
    }

    match field.selection_set() {
        Some(selection_set) => {
            let task = tokio::spawn(complete_object(
                ctx.clone(),
                path.clone(),
                selection_set.clone(),
                value,
                ty.is_nullable(),
            ));
            FieldValueInfo::object(path, task)
        }
        None => FieldValueInfo::scalar(path, value),
    }
}

/// Resolves a nested object and offers a bubble from inside it to the
/// position holding the object.
///
/// An absorbed bubble nulls the position, so deferred units below it are
/// never delivered.
async fn complete_object(
    ctx: ExecutionContext,
    path: ExecutionPath,
    selection_set: SelectionSet,
    source: Value,
    nullable: bool,
) -> Result<Value, FieldFailure> {
    match SelectionResolver::resolve(ctx.clone(), path.clone(), selection_set, source).await {
        Ok(object) => Ok(Value::Object(object)),
        Err(FieldFailure::Bubble(bubble)) => match bubble.absorb_or_raise(nullable) {
            Classification::Recoverable(error) => {
                ctx.errors().push(error);
                ctx.incremental().discard(&path);
                Ok(Value::Null)
            }
            Classification::Propagate(bubble) => Err(bubble.into()),
        },
        Err(failure) => Err(failure),
    }
}

fn recover_or_fail(
    ctx: &ExecutionContext,
    error: FieldError,
    nullable: bool,
    path: ExecutionPath,
) -> FieldValueInfo {
    match classify(error, nullable, &path) {
        Classification::Recoverable(error) => {
            ctx.errors().push(error);
            FieldValueInfo::null(path)
        }
        Classification::Propagate(bubble) => FieldValueInfo::failed(path, bubble.into()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
