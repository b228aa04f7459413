//! Request and execution contexts.

use crate::classifier::{ExceptionHandler, SimpleExceptionHandler};
use crate::error::ErrorSink;
use crate::executor::ExecutorConfig;
use crate::incremental::IncrementalCallState;
use crate::instrumentation::InstrumentationPipeline;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Request context handed to resolvers.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Request-scoped data.
    pub data: HashMap<String, serde_json::Value>,
    /// Variables from the request.
    pub variables: HashMap<String, serde_json::Value>,
}

impl Context {
    /// Creates a new context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with variables.
    pub fn with_variables(variables: HashMap<String, serde_json::Value>) -> Self {
        Self {
            data: HashMap::new(),
            variables,
        }
    }

    /// Sets a value in the context.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
    }

    /// Gets a value from the context.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a variable by name.
    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }

    /// Gets a variable as a specific type.
    pub fn variable_as<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Option<T> {
        self.variables
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

struct Shared {
    config: ExecutorConfig,
    context: Context,
    instrumentation: InstrumentationPipeline,
    exception_handler: Arc<dyn ExceptionHandler>,
}

/// Per-request state shared by every branch of one execution.
///
/// Everything but the error sink and the deferred calls is read-only. Those
/// two belong to the current execution unit: the initial result, or one
/// deferred unit.
#[derive(Clone)]
pub struct ExecutionContext {
    shared: Arc<Shared>,
    errors: ErrorSink,
    incremental: IncrementalCallState,
}

impl ExecutionContext {
    pub fn builder(context: Context) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            config: ExecutorConfig::default(),
            context,
            instrumentation: InstrumentationPipeline::default(),
            exception_handler: Arc::new(SimpleExceptionHandler),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    pub fn context(&self) -> &Context {
        &self.shared.context
    }

    pub fn instrumentation(&self) -> &InstrumentationPipeline {
        &self.shared.instrumentation
    }

    pub fn exception_handler(&self) -> &dyn ExceptionHandler {
        self.shared.exception_handler.as_ref()
    }

    /// Deferred units started by the current execution unit.
    pub fn incremental(&self) -> &IncrementalCallState {
        &self.incremental
    }

    /// Errors of the current execution unit.
    pub fn errors(&self) -> &ErrorSink {
        &self.errors
    }

    /// Returns true if deferred fields should be split off.
    pub fn incremental_enabled(&self) -> bool {
        self.shared.config.enable_incremental_delivery
    }

    /// A context for a new execution unit: same request, fresh error sink
    /// and call list.
    pub fn fork_unit(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            errors: ErrorSink::new(),
            incremental: self.incremental.fork(),
        }
    }
}

/// Builder for [`ExecutionContext`].
pub struct ExecutionContextBuilder {
    config: ExecutorConfig,
    context: Context,
    instrumentation: InstrumentationPipeline,
    exception_handler: Arc<dyn ExceptionHandler>,
}

impl ExecutionContextBuilder {
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn instrumentation(mut self, instrumentation: InstrumentationPipeline) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            shared: Arc::new(Shared {
                config: self.config,
                context: self.context,
                instrumentation: self.instrumentation,
                exception_handler: self.exception_handler,
            }),
            errors: ErrorSink::new(),
            incremental: IncrementalCallState::default(),
        }
    }
}
