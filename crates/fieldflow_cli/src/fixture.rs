//! JSON fixtures: a merged selection tree plus static resolver data.
//!
//! ```json
//! {
//!   "config": { "enableIncrementalDelivery": true },
//!   "root": { "user": { "id": "1", "name": "Ann" } },
//!   "selection": [
//!     { "name": "user", "selection": [
//!       { "name": "id", "type": "ID!" },
//!       { "name": "name", "defer": true, "label": "slow", "delayMs": 50 }
//!     ] }
//!   ]
//! }
//! ```

use crate::CliError;
use fieldflow_runtime::{
    Context, DefaultResolver, ExecutionResult, Executor, ExecutorConfig, Field, FieldType,
    IncrementalPayload, Resolver, ResolverArgs, ResolverError, ResolverFuture, ResolverInfo,
    SelectionSet,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// A fixture file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    /// Executor config overrides.
    #[serde(default)]
    pub config: ExecutorConfig,
    /// The root value resolvers start from.
    #[serde(default)]
    pub root: Value,
    pub selection: Vec<FieldSpec>,
}

/// One field of a fixture selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    /// Declared type, written as in GraphQL: `String`, `ID!`, `[Int!]`.
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub defer: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
    /// Fixed value returned instead of reading the parent.
    #[serde(default)]
    pub value: Option<Value>,
    /// Makes the resolver fail with this message.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub selection: Option<Vec<FieldSpec>>,
}

/// What a fixture run produced.
#[derive(Debug)]
pub struct FixtureOutput {
    pub initial: ExecutionResult,
    pub has_next: bool,
    pub payloads: Vec<IncrementalPayload>,
}

impl Fixture {
    /// Reads a fixture file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let source = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&source)
    }

    pub fn from_json(source: &str) -> Result<Self, CliError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Builds the selection tree the engine executes.
    pub fn selection_set(&self) -> Result<SelectionSet, CliError> {
        build_selection(&self.selection)
    }

    /// Runs the fixture and collects every incremental payload.
    pub async fn execute(&self, config: ExecutorConfig) -> Result<FixtureOutput, CliError> {
        let selection = self.selection_set()?;
        let executor = Executor::with_config(config);
        let result = executor
            .execute_incremental(&selection, self.root.clone(), &Context::new())
            .await;

        let payloads = result.incremental.collect().await;
        Ok(FixtureOutput {
            initial: result.initial,
            has_next: result.has_next,
            payloads,
        })
    }
}

fn build_selection(specs: &[FieldSpec]) -> Result<SelectionSet, CliError> {
    specs
        .iter()
        .map(FieldSpec::to_field)
        .collect::<Result<Vec<_>, _>>()
        .map(|fields| fields.into_iter().collect())
}

impl FieldSpec {
    fn to_field(&self) -> Result<Field, CliError> {
        let mut field = Field::new(&self.name);
        if let Some(alias) = &self.alias {
            field = field.alias(alias);
        }
        if let Some(ty) = &self.ty {
            field = field.ty(parse_type(ty)?);
        }
        for (name, value) in &self.arguments {
            field = field.argument(name, value.clone());
        }
        if self.value.is_some() || self.error.is_some() || self.delay_ms.is_some() {
            field = field.resolver(FixtureResolver {
                value: self.value.clone(),
                error: self.error.clone(),
                delay: self.delay_ms.map(Duration::from_millis),
            });
        }
        if let Some(selection) = &self.selection {
            field = field.selection(build_selection(selection)?);
        }
        if self.defer {
            field = field.defer(self.label.clone());
        }
        Ok(field)
    }
}

/// Parses a GraphQL type reference such as `[String!]!`.
pub fn parse_type(source: &str) -> Result<FieldType, CliError> {
    let trimmed = source.trim();
    let (inner, nullable) = match trimmed.strip_suffix('!') {
        Some(inner) => (inner.trim_end(), false),
        None => (trimmed, true),
    };

    if let Some(rest) = inner.strip_prefix('[') {
        let item = rest
            .strip_suffix(']')
            .ok_or_else(|| CliError::InvalidType(source.to_string()))?;
        let item = parse_type(item)?;
        return Ok(if nullable {
            FieldType::list(item)
        } else {
            FieldType::non_null_list(item)
        });
    }

    let valid = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(CliError::InvalidType(source.to_string()));
    }
    Ok(if nullable {
        FieldType::nullable()
    } else {
        FieldType::non_null()
    })
}

/// Resolver backed by fixture data.
struct FixtureResolver {
    value: Option<Value>,
    error: Option<String>,
    delay: Option<Duration>,
}

impl Resolver for FixtureResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.error {
                return Err(ResolverError::Custom(message.clone()));
            }
            match &self.value {
                Some(value) => Ok(value.clone()),
                None => DefaultResolver.resolve(parent, args, ctx, info).await,
            }
        })
    }
}
