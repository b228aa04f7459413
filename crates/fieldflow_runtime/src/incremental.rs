//! Incremental delivery of deferred fields.
//!
//! Deferred fields are split off at every object level. Each one becomes an
//! independent execution unit: a spawned resolve of a one-field selection
//! with its own error list. Finished units are delivered as
//! [`IncrementalPayload`]s through an [`IncrementalStream`].

use crate::context::ExecutionContext;
use crate::error::{ExecutionError, FieldError};
use crate::path::ExecutionPath;
use crate::selection::{Field, SelectionSet};
use crate::strategy::SelectionResolver;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context as TaskContext, Poll};
use tokio::task::JoinHandle;

/// One deferred payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalPayload {
    /// Path of the deferred field this payload completes.
    pub path: ExecutionPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `{responseKey: value}`, or null if the unit failed as a whole.
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    /// Whether more payloads follow.
    pub has_next: bool,
}

/// The initial/deferred split of one selection set.
#[derive(Debug, Clone)]
pub struct DeferredExecutionSupport {
    initial: SelectionSet,
    deferred: Vec<Field>,
}

impl DeferredExecutionSupport {
    /// Splits `selection_set`. With `enabled` off nothing is deferred.
    pub fn partition(selection_set: &SelectionSet, enabled: bool) -> Self {
        if !enabled || !selection_set.iter().any(Field::is_deferred) {
            return Self {
                initial: selection_set.clone(),
                deferred: Vec::new(),
            };
        }

        let initial = selection_set.filter(|field| !field.is_deferred());
        let deferred = selection_set
            .iter()
            .filter(|field| field.is_deferred())
            .cloned()
            .collect();
        Self { initial, deferred }
    }

    pub fn initial(&self) -> &SelectionSet {
        &self.initial
    }

    pub fn deferred(&self) -> &[Field] {
        &self.deferred
    }

    /// Starts one execution unit per deferred field of the node at `path`.
    pub(crate) fn schedule(&self, ctx: &ExecutionContext, path: &ExecutionPath, source: &Value) {
        for field in &self.deferred {
            ctx.incremental().spawn_call(ctx, path, field, source);
        }
    }
}

struct DeferredCall {
    path: ExecutionPath,
    label: Option<String>,
    state: IncrementalCallState,
    task: JoinHandle<IncrementalPayload>,
}

/// A finished unit and the calls it started below itself.
struct UnitOutcome {
    payload: IncrementalPayload,
    calls: Vec<DeferredCall>,
}

impl DeferredCall {
    fn into_outcome(self) -> BoxFuture<'static, UnitOutcome> {
        let Self {
            path,
            label,
            state,
            task,
        } = self;
        Box::pin(async move {
            let payload = match task.await {
                Ok(payload) => payload,
                Err(join_error) => {
                    let error = ExecutionError::from(join_error);
                    tracing::error!(path = %path, %error, "deferred unit failed");
                    state.discard(&path);
                    IncrementalPayload {
                        errors: vec![error.to_field_error().with_path(path.clone())],
                        path,
                        label,
                        data: Value::Null,
                        has_next: true,
                    }
                }
            };
            UnitOutcome {
                payload,
                calls: state.close(),
            }
        })
    }
}

#[derive(Default)]
struct UnitCalls {
    started: Vec<DeferredCall>,
    closed: bool,
}

/// Deferred units started by one execution unit.
///
/// The list is closed once its unit has finished. By then every position
/// the unit nulled is recorded in the request-wide discard list, which is
/// shared by all units of a request. Calls under a discarded position are
/// dropped, both when they are started and when the list is closed.
#[derive(Clone, Default)]
pub struct IncrementalCallState {
    calls: Arc<Mutex<UnitCalls>>,
    discarded: Arc<Mutex<Vec<ExecutionPath>>>,
}

impl IncrementalCallState {
    /// An empty call list for a new unit of the same request.
    pub(crate) fn fork(&self) -> Self {
        Self {
            calls: Arc::default(),
            discarded: Arc::clone(&self.discarded),
        }
    }

    /// Spawns the unit for `field`, a deferred child of the node at
    /// `parent_path` whose source value is `source`.
    pub(crate) fn spawn_call(
        &self,
        ctx: &ExecutionContext,
        parent_path: &ExecutionPath,
        field: &Field,
        source: &Value,
    ) {
        let path = parent_path.child(field.response_key());
        if self.is_discarded(&path) {
            tracing::debug!(path = %path, "deferred unit dropped under a discarded node");
            return;
        }

        let mut calls = lock(&self.calls);
        if calls.closed {
            tracing::debug!(path = %path, "deferred unit dropped after its owner finished");
            return;
        }

        let label = field.deferral().and_then(|defer| defer.label.clone());
        tracing::debug!(path = %path, label = ?label, "deferred unit started");
        let unit = ctx.fork_unit();
        let state = unit.incremental().clone();
        let task = tokio::spawn(run_unit(
            unit,
            path.clone(),
            label.clone(),
            SelectionSet::new().with_field(field.undeferred()),
            source.clone(),
        ));
        calls.started.push(DeferredCall {
            path,
            label,
            state,
            task,
        });
    }

    /// Records that the position at `path` was nulled, along with
    /// everything below it.
    pub fn discard(&self, path: &ExecutionPath) {
        let mut discarded = lock(&self.discarded);
        if !discarded.iter().any(|prefix| prefix.contains(path)) {
            tracing::trace!(path = %path, "position discarded");
            discarded.push(path.clone());
        }
    }

    /// Returns true if `path` lies under a discarded position.
    pub fn is_discarded(&self, path: &ExecutionPath) -> bool {
        lock(&self.discarded)
            .iter()
            .any(|prefix| prefix.contains(path))
    }

    /// Number of started units not yet taken by a stream.
    pub fn pending(&self) -> usize {
        lock(&self.calls).started.len()
    }

    /// Closes the list and returns the calls whose position survived.
    fn close(&self) -> Vec<DeferredCall> {
        let started = {
            let mut calls = lock(&self.calls);
            calls.closed = true;
            std::mem::take(&mut calls.started)
        };
        started
            .into_iter()
            .filter(|call| {
                let live = !self.is_discarded(&call.path);
                if !live {
                    tracing::debug!(path = %call.path, "deferred unit dropped under a discarded node");
                    call.task.abort();
                }
                live
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for IncrementalCallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalCallState")
            .field("pending", &self.pending())
            .field("discarded", &lock(&self.discarded).len())
            .finish()
    }
}

async fn run_unit(
    ctx: ExecutionContext,
    path: ExecutionPath,
    label: Option<String>,
    selection_set: SelectionSet,
    source: Value,
) -> IncrementalPayload {
    let parent_path = path.parent().unwrap_or_default();
    let data = match SelectionResolver::resolve(ctx.clone(), parent_path, selection_set, source).await {
        Ok(object) => Value::Object(object),
        Err(failure) => {
            ctx.errors().push(failure.into_error());
            ctx.incremental().discard(&path);
            Value::Null
        }
    };
    let errors = ctx.errors().take();
    tracing::debug!(path = %path, errors = errors.len(), "deferred unit completed");

    IncrementalPayload {
        path,
        label,
        data,
        errors,
        has_next: true,
    }
}

/// Payloads of deferred units, in completion order.
///
/// Units started inside another unit are picked up when that unit's
/// payload is yielded, so `has_next` is false only on the very last
/// payload.
pub struct IncrementalStream {
    pending: FuturesUnordered<BoxFuture<'static, UnitOutcome>>,
}

impl IncrementalStream {
    /// Takes over the calls of a finished execution unit.
    pub(crate) fn new(state: IncrementalCallState) -> Self {
        let pending = state
            .close()
            .into_iter()
            .map(DeferredCall::into_outcome)
            .collect();
        Self { pending }
    }

    /// A stream with nothing to deliver.
    pub fn empty() -> Self {
        Self {
            pending: FuturesUnordered::new(),
        }
    }

    /// Returns true if at least one payload is still to come.
    pub fn has_next(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl Stream for IncrementalStream {
    type Item = IncrementalPayload;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.pending.poll_next_unpin(cx) {
            Poll::Ready(Some(UnitOutcome { mut payload, calls })) => {
                this.pending
                    .extend(calls.into_iter().map(DeferredCall::into_outcome));
                payload.has_next = this.has_next();
                Poll::Ready(Some(payload))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for IncrementalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalStream")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::executor::ExecutorConfig;
    use crate::selection::FieldType;
    use serde_json::json;

    fn incremental_context() -> ExecutionContext {
        ExecutionContext::builder(Context::new())
            .config(ExecutorConfig {
                enable_incremental_delivery: true,
                ..ExecutorConfig::default()
            })
            .build()
    }

    fn selection() -> SelectionSet {
        SelectionSet::new()
            .with_field(Field::new("id"))
            .with_field(Field::new("bio").defer(Some("bio".to_string())))
            .with_field(Field::new("name"))
    }

    #[test]
    fn test_partition_disabled() {
        let support = DeferredExecutionSupport::partition(&selection(), false);
        assert_eq!(support.initial().len(), 3);
        assert!(support.deferred().is_empty());
    }

    #[test]
    fn test_partition_enabled() {
        let support = DeferredExecutionSupport::partition(&selection(), true);
        assert_eq!(support.initial().keys().collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(support.deferred().len(), 1);
        assert_eq!(support.deferred()[0].response_key(), "bio");
    }

    #[tokio::test]
    async fn test_stream_yields_each_unit_once() {
        let ctx = incremental_context();
        let path = ExecutionPath::root().child("user");
        let source = json!({"bio": "hello", "avatar": "a.png"});
        let support = DeferredExecutionSupport::partition(
            &SelectionSet::new()
                .with_field(Field::new("bio").defer(None))
                .with_field(Field::new("avatar").defer(Some("pic".to_string()))),
            true,
        );
        support.schedule(&ctx, &path, &source);
        assert_eq!(ctx.incremental().pending(), 2);

        let stream = IncrementalStream::new(ctx.incremental().clone());
        assert!(stream.has_next());
        let mut payloads: Vec<_> = stream.collect().await;
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].has_next);
        assert!(!payloads[1].has_next);

        payloads.sort_by_key(|payload| payload.path.to_string());
        assert_eq!(payloads[0].path, path.child("avatar"));
        assert_eq!(payloads[0].label.as_deref(), Some("pic"));
        assert_eq!(payloads[0].data, json!({"avatar": "a.png"}));
        assert_eq!(payloads[1].data, json!({"bio": "hello"}));
    }

    #[tokio::test]
    async fn test_unit_bubble_nulls_its_data() {
        let ctx = incremental_context();
        let field = Field::new("secret").ty(FieldType::non_null()).defer(None);
        ctx.incremental()
            .spawn_call(&ctx, &ExecutionPath::root(), &field, &json!({}));

        let payloads: Vec<_> = IncrementalStream::new(ctx.incremental().clone()).collect().await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data, Value::Null);
        assert_eq!(payloads[0].errors.len(), 1);
        assert_eq!(payloads[0].errors[0].code(), Some("NON_NULL_VIOLATION"));
        // Unit errors never leak into the initial result.
        assert!(ctx.errors().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_unit_still_delivers() {
        let ctx = incremental_context();
        let field = Field::new("boom")
            .resolve_fn(|_, _, _, _| panic!("deferred resolver exploded"))
            .defer(None);
        ctx.incremental()
            .spawn_call(&ctx, &ExecutionPath::root(), &field, &json!({}));

        let payloads: Vec<_> = IncrementalStream::new(ctx.incremental().clone()).collect().await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data, Value::Null);
        assert_eq!(payloads[0].errors[0].code(), Some("INTERNAL_ERROR"));
        assert!(!payloads[0].has_next);
    }

    #[tokio::test]
    async fn test_nested_units_are_picked_up() {
        let ctx = incremental_context();
        let field = Field::new("profile")
            .selection(
                SelectionSet::new()
                    .with_field(Field::new("name"))
                    .with_field(Field::new("friends").defer(Some("friends".to_string()))),
            )
            .defer(Some("profile".to_string()));
        let source = json!({"profile": {"name": "Ann", "friends": 3}});
        ctx.incremental()
            .spawn_call(&ctx, &ExecutionPath::root(), &field, &source);

        let payloads: Vec<_> = IncrementalStream::new(ctx.incremental().clone()).collect().await;
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].path, ExecutionPath::root().child("profile"));
        assert_eq!(payloads[0].data, json!({"profile": {"name": "Ann"}}));
        assert!(payloads[0].has_next);
        assert_eq!(
            payloads[1].path,
            ExecutionPath::root().child("profile").child("friends")
        );
        assert_eq!(payloads[1].data, json!({"friends": 3}));
        assert!(!payloads[1].has_next);
    }

    #[tokio::test]
    async fn test_discarded_parent_skips_schedule() {
        let ctx = incremental_context();
        let user = ExecutionPath::root().child("user");
        ctx.incremental().discard(&user);

        let support = DeferredExecutionSupport::partition(&selection(), true);
        support.schedule(&ctx, &user, &json!({"bio": "hello"}));
        assert_eq!(ctx.incremental().pending(), 0);
        assert!(!IncrementalStream::new(ctx.incremental().clone()).has_next());
    }

    #[tokio::test]
    async fn test_discard_after_start_drops_unit() {
        let ctx = incremental_context();
        let user = ExecutionPath::root().child("user");
        let support = DeferredExecutionSupport::partition(&selection(), true);
        support.schedule(&ctx, &user, &json!({"bio": "hello"}));
        assert_eq!(ctx.incremental().pending(), 1);

        ctx.incremental().discard(&user);
        let stream = IncrementalStream::new(ctx.incremental().clone());
        assert!(!stream.has_next());
        assert!(stream.collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn test_calls_after_close_are_dropped() {
        let ctx = incremental_context();
        let stream = IncrementalStream::new(ctx.incremental().clone());

        let field = Field::new("late").defer(None);
        ctx.incremental()
            .spawn_call(&ctx, &ExecutionPath::root(), &field, &json!({"late": 1}));
        assert_eq!(ctx.incremental().pending(), 0);
        assert!(stream.collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn test_bubble_inside_unit_drops_its_nested_units() {
        let ctx = incremental_context();
        let field = Field::new("profile")
            .selection(
                SelectionSet::new()
                    .with_field(Field::new("id").non_null())
                    .with_field(Field::new("friends").defer(None)),
            )
            .defer(None);
        let source = json!({"profile": {"id": null, "friends": 3}});
        ctx.incremental()
            .spawn_call(&ctx, &ExecutionPath::root(), &field, &source);

        let payloads: Vec<_> = IncrementalStream::new(ctx.incremental().clone()).collect().await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data, json!({"profile": null}));
        assert_eq!(payloads[0].errors.len(), 1);
        assert!(!payloads[0].has_next);
    }

    #[test]
    fn test_payload_serialization() {
        let payload = IncrementalPayload {
            path: ExecutionPath::root().child("user").index(0),
            label: None,
            data: json!({"bio": null}),
            errors: Vec::new(),
            has_next: false,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"path": ["user", 0], "data": {"bio": null}, "hasNext": false})
        );
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let stream = IncrementalStream::empty();
        assert!(!stream.has_next());
        assert_eq!(stream.collect::<Vec<_>>().await.len(), 0);
    }
}
