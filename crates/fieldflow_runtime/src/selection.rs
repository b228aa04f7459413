//! Merged selections consumed by the engine.
//!
//! Fields and selection sets are produced by an upstream merge step and are
//! immutable afterwards. Cloning is cheap: the field map sits behind an
//! `Arc`.

use crate::context::Context;
use crate::resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, Resolver, ResolverArgs, ResolverInfo,
    ResolverResult, SharedResolver,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The declared output type of a field, reduced to what execution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// A scalar, enum or object type.
    Named { nullable: bool },
    /// A list of `item`.
    List { nullable: bool, item: Box<FieldType> },
}

impl FieldType {
    /// A nullable named type.
    pub fn nullable() -> Self {
        Self::Named { nullable: true }
    }

    /// A non-nullable named type.
    pub fn non_null() -> Self {
        Self::Named { nullable: false }
    }

    /// A nullable list of `item`.
    pub fn list(item: FieldType) -> Self {
        Self::List {
            nullable: true,
            item: Box::new(item),
        }
    }

    /// A non-nullable list of `item`.
    pub fn non_null_list(item: FieldType) -> Self {
        Self::List {
            nullable: false,
            item: Box::new(item),
        }
    }

    /// Returns true if null is an acceptable value at this position.
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Named { nullable } | Self::List { nullable, .. } => *nullable,
        }
    }

    /// Returns the item type of a list.
    pub fn item(&self) -> Option<&FieldType> {
        match self {
            Self::List { item, .. } => Some(item),
            Self::Named { .. } => None,
        }
    }
}

impl Default for FieldType {
    fn default() -> Self {
        Self::nullable()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { nullable } => f.write_str(if *nullable { "T" } else { "T!" }),
            Self::List { nullable, item } => {
                write!(f, "[{item}]")?;
                if !nullable {
                    f.write_str("!")?;
                }
                Ok(())
            }
        }
    }
}

/// Marks a field for deferred delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defer {
    /// Label echoed back in the incremental payload.
    pub label: Option<String>,
}

/// A field in a merged selection.
#[derive(Clone)]
pub struct Field {
    response_key: String,
    name: String,
    arguments: Vec<(String, Value)>,
    resolver: SharedResolver,
    ty: FieldType,
    selection_set: Option<SelectionSet>,
    defer: Option<Defer>,
}

impl Field {
    /// Creates a nullable field resolved by property access on the parent.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            response_key: name.clone(),
            name,
            arguments: Vec::new(),
            resolver: Arc::new(DefaultResolver),
            ty: FieldType::default(),
            selection_set: None,
            defer: None,
        }
    }

    /// Sets the alias used as response key.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.response_key = alias.into();
        self
    }

    /// Adds an argument.
    pub fn argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    /// Sets the declared type.
    pub fn ty(mut self, ty: FieldType) -> Self {
        self.ty = ty;
        self
    }

    /// Shorthand for a non-nullable named type.
    pub fn non_null(self) -> Self {
        self.ty(FieldType::non_null())
    }

    /// Sets the resolver.
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Resolves with a sync function.
    pub fn resolve_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.resolver(FnResolver::new(f))
    }

    /// Resolves with an async function.
    pub fn resolve_async<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.resolver(AsyncFnResolver::new(f))
    }

    /// Sets the nested selection, making this an object-typed field.
    pub fn selection(mut self, selection_set: SelectionSet) -> Self {
        self.selection_set = Some(selection_set);
        self
    }

    /// Marks the field for deferred delivery.
    pub fn defer(mut self, label: Option<String>) -> Self {
        self.defer = Some(Defer { label });
        self
    }

    /// Returns a copy of this field without the deferral marker.
    pub(crate) fn undeferred(&self) -> Self {
        Self {
            defer: None,
            ..self.clone()
        }
    }

    pub fn response_key(&self) -> &str {
        &self.response_key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[(String, Value)] {
        &self.arguments
    }

    pub fn resolver_handle(&self) -> &SharedResolver {
        &self.resolver
    }

    pub fn field_type(&self) -> &FieldType {
        &self.ty
    }

    pub fn selection_set(&self) -> Option<&SelectionSet> {
        self.selection_set.as_ref()
    }

    pub fn deferral(&self) -> Option<&Defer> {
        self.defer.as_ref()
    }

    pub fn is_deferred(&self) -> bool {
        self.defer.is_some()
    }

    /// Builds the info handed to the resolver.
    pub(crate) fn resolver_info(&self, path: crate::path::ExecutionPath) -> ResolverInfo {
        ResolverInfo::new(&self.name)
            .with_response_key(&self.response_key)
            .with_path(path)
            .with_nullable(self.ty.is_nullable())
            .with_selected_fields(
                self.selection_set
                    .as_ref()
                    .map(|s| s.keys().map(str::to_string).collect())
                    .unwrap_or_default(),
            )
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("response_key", &self.response_key)
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("selection_set", &self.selection_set)
            .field("defer", &self.defer)
            .finish_non_exhaustive()
    }
}

/// An ordered set of fields keyed by response key.
#[derive(Clone, Default)]
pub struct SelectionSet {
    fields: Arc<IndexMap<String, Field>>,
}

impl SelectionSet {
    /// Creates an empty selection set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field. A field with the same response key is replaced in
    /// place.
    pub fn with_field(mut self, field: Field) -> Self {
        Arc::make_mut(&mut self.fields).insert(field.response_key.clone(), field);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the fields matching `keep`, in order.
    pub fn filter(&self, keep: impl Fn(&Field) -> bool) -> Self {
        self.iter().filter(|f| keep(f)).cloned().collect()
    }
}

impl FromIterator<Field> for SelectionSet {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        let fields = iter
            .into_iter()
            .map(|field| (field.response_key.clone(), field))
            .collect();
        Self {
            fields: Arc::new(fields),
        }
    }
}

impl fmt::Debug for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.values()).finish()
    }
}
