//! Asynchronous field execution for fieldflow.
//!
//! This crate resolves a merged selection tree against field resolvers:
//! - `selection`: fields, selection sets and declared field types
//! - `strategy`: the concurrent selection resolver
//! - `combinator`: joining already started tasks in input order
//! - `classifier`: null propagation and resolver error handling
//! - `instrumentation`: lifecycle observers for every resolver invocation
//! - `incremental`: deferred fields and incremental payloads
//! - `executor`: top-level execution and configuration

pub mod classifier;
pub mod combinator;
pub mod context;
pub mod error;
pub mod executor;
pub mod field_value;
pub mod incremental;
pub mod instrumentation;
pub mod path;
pub mod resolver;
pub mod selection;
pub mod strategy;

pub use classifier::{
    classify, Classification, ExceptionHandler, ExceptionHandlerParameters, FieldFailure,
    NullBubble, SimpleExceptionHandler,
};
pub use combinator::{join_ordered, CombinedBuilder};
pub use context::{Context, ExecutionContext};
pub use error::{ExecutionError, FieldError};
pub use executor::{ExecutionResult, Executor, ExecutorConfig, IncrementalExecutionResult};
pub use field_value::{CompleteValueType, FieldValueInfo, ObjectValue};
pub use incremental::{DeferredExecutionSupport, IncrementalPayload, IncrementalStream};
pub use instrumentation::{
    Instrumentation, InstrumentationPipeline, StrategyParameters, StrategyState,
    TracingInstrumentation,
};
pub use path::{ExecutionPath, PathSegment};
pub use resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, Resolver, ResolverArgs, ResolverError,
    ResolverFuture, ResolverInfo, ResolverResult, SharedResolver,
};
pub use selection::{Defer, Field, FieldType, SelectionSet};
pub use strategy::SelectionResolver;
