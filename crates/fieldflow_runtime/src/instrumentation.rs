//! Lifecycle observers for strategy invocations.
//!
//! Each invocation of the selection resolver walks
//! `Created → Dispatched → ValueInfoReported → Completed`, or takes the
//! `FieldValuesFailed → Completed` exit. `Completed` is delivered exactly
//! once on every path, including when the invocation is dropped half way.
//!
//! Observers are notified in registration order on the way in and in
//! reverse order on completion.

use crate::classifier::FieldFailure;
use crate::error::ExecutionError;
use crate::field_value::{FieldValueInfo, ObjectValue};
use crate::path::ExecutionPath;
use std::sync::Arc;

/// What an observer learns about the invocation it is watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyParameters {
    /// Path of the node being resolved.
    pub path: ExecutionPath,
    /// Response keys resolved by this invocation, in order.
    pub fields: Vec<String>,
}

/// The observable states of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyState {
    Created,
    Dispatched,
    ValueInfoReported,
    FieldValuesFailed,
    Completed,
}

/// Outcome handed to [`Instrumentation::on_completed`].
pub type StrategyOutcome<'a> = Result<&'a ObjectValue, &'a FieldFailure>;

/// A lifecycle observer. Every hook defaults to a no-op.
pub trait Instrumentation: Send + Sync {
    fn begin_strategy(&self, _params: &StrategyParameters) {}

    fn on_dispatched(&self, _params: &StrategyParameters) {}

    fn on_field_values_info(&self, _params: &StrategyParameters, _infos: &[FieldValueInfo]) {}

    fn on_field_values_failed(&self, _params: &StrategyParameters, _failure: &FieldFailure) {}

    fn on_completed(&self, _params: &StrategyParameters, _outcome: StrategyOutcome<'_>) {}
}

/// An ordered list of observers.
#[derive(Clone, Default)]
pub struct InstrumentationPipeline {
    observers: Vec<Arc<dyn Instrumentation>>,
}

impl InstrumentationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observer.
    pub fn with(mut self, observer: Arc<dyn Instrumentation>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn Instrumentation>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Opens the lifecycle of one invocation.
    pub fn begin(&self, params: StrategyParameters) -> StrategyInstrumentation {
        for observer in &self.observers {
            observer.begin_strategy(&params);
        }
        StrategyInstrumentation {
            observers: self.observers.clone(),
            params,
            state: StrategyState::Created,
        }
    }
}

impl std::fmt::Debug for InstrumentationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationPipeline")
            .field("observer_count", &self.observers.len())
            .finish()
    }
}

/// The open lifecycle of one invocation.
///
/// Dropping it before [`complete`](Self::complete) reports completion with
/// [`ExecutionError::Abandoned`].
pub struct StrategyInstrumentation {
    observers: Vec<Arc<dyn Instrumentation>>,
    params: StrategyParameters,
    state: StrategyState,
}

impl StrategyInstrumentation {
    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn dispatched(&mut self) {
        self.state = StrategyState::Dispatched;
        for observer in &self.observers {
            observer.on_dispatched(&self.params);
        }
    }

    pub fn field_values_info(&mut self, infos: &[FieldValueInfo]) {
        self.state = StrategyState::ValueInfoReported;
        for observer in &self.observers {
            observer.on_field_values_info(&self.params, infos);
        }
    }

    pub fn field_values_failed(&mut self, failure: &FieldFailure) {
        self.state = StrategyState::FieldValuesFailed;
        for observer in &self.observers {
            observer.on_field_values_failed(&self.params, failure);
        }
    }

    /// Closes the lifecycle.
    pub fn complete(mut self, outcome: StrategyOutcome<'_>) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: StrategyOutcome<'_>) {
        if self.state == StrategyState::Completed {
            return;
        }
        self.state = StrategyState::Completed;
        for observer in self.observers.iter().rev() {
            observer.on_completed(&self.params, outcome);
        }
    }
}

impl Drop for StrategyInstrumentation {
    fn drop(&mut self) {
        if self.state != StrategyState::Completed {
            let failure = FieldFailure::Internal(ExecutionError::Abandoned);
            self.finish(Err(&failure));
        }
    }
}

/// Emits a `tracing` event for every transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn begin_strategy(&self, params: &StrategyParameters) {
        tracing::debug!(path = %params.path, fields = params.fields.len(), "strategy created");
    }

    fn on_dispatched(&self, params: &StrategyParameters) {
        tracing::debug!(path = %params.path, "strategy dispatched");
    }

    fn on_field_values_info(&self, params: &StrategyParameters, infos: &[FieldValueInfo]) {
        for info in infos {
            tracing::trace!(path = %info.path(), kind = ?info.kind(), "field value info");
        }
        tracing::debug!(path = %params.path, count = infos.len(), "field value infos reported");
    }

    fn on_field_values_failed(&self, params: &StrategyParameters, failure: &FieldFailure) {
        match failure {
            FieldFailure::Bubble(bubble) => {
                tracing::debug!(path = %params.path, origin = %bubble.path(), "null bubbled through");
            }
            FieldFailure::Internal(error) => {
                tracing::error!(path = %params.path, %error, "field values failed");
            }
        }
    }

    fn on_completed(&self, params: &StrategyParameters, outcome: StrategyOutcome<'_>) {
        tracing::debug!(path = %params.path, ok = outcome.is_ok(), "strategy completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Instrumentation for Recorder {
        fn begin_strategy(&self, _params: &StrategyParameters) {
            self.events.lock().unwrap().push(format!("{}:begin", self.name));
        }

        fn on_dispatched(&self, _params: &StrategyParameters) {
            self.events.lock().unwrap().push(format!("{}:dispatched", self.name));
        }

        fn on_field_values_failed(&self, _params: &StrategyParameters, _failure: &FieldFailure) {
            self.events.lock().unwrap().push(format!("{}:failed", self.name));
        }

        fn on_completed(&self, _params: &StrategyParameters, outcome: StrategyOutcome<'_>) {
            let tag = if outcome.is_ok() { "ok" } else { "err" };
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:completed:{tag}", self.name));
        }
    }

    fn params() -> StrategyParameters {
        StrategyParameters {
            path: ExecutionPath::root(),
            fields: vec!["a".to_string()],
        }
    }

    fn pipeline(events: &Arc<Mutex<Vec<String>>>) -> InstrumentationPipeline {
        InstrumentationPipeline::new()
            .with(Arc::new(Recorder {
                name: "first",
                events: Arc::clone(events),
            }))
            .with(Arc::new(Recorder {
                name: "second",
                events: Arc::clone(events),
            }))
    }

    #[test]
    fn test_entry_in_order_completion_reversed() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = pipeline(&events).begin(params());
        ctx.dispatched();
        let value = ObjectValue::new();
        ctx.complete(Ok(&value));

        assert_eq!(
            *events.lock().unwrap(),
            [
                "first:begin",
                "second:begin",
                "first:dispatched",
                "second:dispatched",
                "second:completed:ok",
                "first:completed:ok",
            ]
        );
    }

    #[test]
    fn test_failure_completes_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = pipeline(&events).begin(params());
        ctx.dispatched();
        let failure = FieldFailure::Internal(ExecutionError::Internal("boom".to_string()));
        ctx.field_values_failed(&failure);
        assert_eq!(ctx.state(), StrategyState::FieldValuesFailed);
        ctx.complete(Err(&failure));

        let events = events.lock().unwrap();
        assert_eq!(
            events.iter().filter(|e| e.contains("completed")).count(),
            2
        );
        assert!(events.contains(&"first:completed:err".to_string()));
    }

    #[test]
    fn test_drop_without_complete_reports_abandoned() {
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let mut ctx = pipeline(&events).begin(params());
            ctx.dispatched();
        }

        let events = events.lock().unwrap();
        assert_eq!(events[events.len() - 2..], ["second:completed:err", "first:completed:err"]);
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = InstrumentationPipeline::default();
        assert!(pipeline.is_empty());
        let mut ctx = pipeline.begin(params());
        ctx.dispatched();
        assert_eq!(ctx.state(), StrategyState::Dispatched);
    }
}
