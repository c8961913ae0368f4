//! Resolver system for graft.
//!
//! This module provides the resolver trait and infrastructure for field resolution.

use crate::context::FieldContext;
use crate::dataloader::LoadError;
use graft_core::{AggregateError, ErrorCode, GraphQLError};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: IndexMap<String, Value>,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from a list of (name, value) pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
            })
    }

    /// Deserializes all arguments into one struct.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, ResolverError> {
        let object: serde_json::Map<String, Value> = self
            .args
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| ResolverError::ArgumentParseError("arguments".to_string(), e.to_string()))
    }

    /// Returns all arguments.
    pub fn all(&self) -> &IndexMap<String, Value> {
        &self.args
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }

    /// Sets an argument only if it is absent.
    pub fn set_default(&mut self, name: &str, value: &Value) {
        if !self.args.contains_key(name) {
            self.args.insert(name.to_string(), value.clone());
        }
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<Value, ResolverError>;

/// Future type for async resolvers.
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// Error from a resolver.
#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    /// Field not found.
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    /// Missing required argument.
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    /// Argument parse error.
    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    /// Custom error.
    #[error("{0}")]
    Custom(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A data loader failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A fully formed GraphQL error.
    #[error(transparent)]
    GraphQL(#[from] GraphQLError),

    /// Several errors for the same field.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl ResolverError {
    /// Creates a custom error.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

impl From<ResolverError> for GraphQLError {
    fn from(error: ResolverError) -> Self {
        match error {
            ResolverError::GraphQL(error) => error,
            ResolverError::Aggregate(aggregate) => GraphQLError::from_error(aggregate),
            ResolverError::Load(LoadError::Cancelled) => {
                GraphQLError::from_error(LoadError::Cancelled).with_code(ErrorCode::Cancelled)
            }
            ResolverError::Load(error) => {
                GraphQLError::from_error(error).with_code(ErrorCode::BatchLoadFailed)
            }
            other => GraphQLError::from_error(other).with_code(ErrorCode::ResolverError),
        }
    }
}

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a>;
}

/// A shared resolver.
pub type SharedResolver = Arc<dyn Resolver>;

/// A sync resolver function.
pub type SyncResolverFn = Arc<dyn Fn(&FieldContext) -> ResolverResult + Send + Sync>;

/// A wrapper for sync resolver functions.
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    /// Creates a new function resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&FieldContext) -> ResolverResult + Send + Sync + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

impl Resolver for FnResolver {
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a> {
        let result = (self.func)(ctx);
        Box::pin(async move { result })
    }
}

/// An async resolver function type.
pub type AsyncResolverFn = Arc<dyn Fn(FieldContext) -> ResolverFuture<'static> + Send + Sync>;

/// A wrapper for async resolver functions.
///
/// The function receives an owned clone of the field context, so the
/// returned future may hold it across awaits.
pub struct AsyncFnResolver {
    func: AsyncResolverFn,
}

impl AsyncFnResolver {
    /// Creates a new async function resolver.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(FieldContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a> {
        (self.func)(ctx.clone())
    }
}

/// Default resolver that reads the field from the parent object.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(&'a self, ctx: &'a FieldContext) -> ResolverFuture<'a> {
        let field_name = ctx.field_name();
        let result = match ctx.parent() {
            Value::Object(map) => match map.get(field_name) {
                Some(value) => Ok(value.clone()),
                // Try snake_case version
                None => Ok(map
                    .get(&to_snake_case(field_name))
                    .cloned()
                    .unwrap_or(Value::Null)),
            },
            Value::Null => Ok(Value::Null),
            _ => Err(ResolverError::FieldNotFound(field_name.to_string())),
        };
        Box::pin(async move { result })
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Resolvers organized by type and field, applied when a schema is built.
pub struct ResolverMap {
    /// Resolvers indexed by "TypeName.fieldName".
    resolvers: HashMap<String, SharedResolver>,

    /// Default resolver for unregistered fields.
    default_resolver: Option<SharedResolver>,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    /// Creates a resolver map whose default reads parent properties.
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
            default_resolver: Some(Arc::new(DefaultResolver)),
        }
    }

    /// Registers a resolver for a specific type and field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.resolvers.insert(key, Arc::new(resolver));
    }

    /// Registers a sync function as a resolver.
    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&FieldContext) -> ResolverResult + Send + Sync + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    /// Registers an async function as a resolver.
    pub fn register_async<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(FieldContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    /// Gets the resolver for a type and field, falling back to the default.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<SharedResolver> {
        let key = format!("{type_name}.{field_name}");
        self.resolvers
            .get(&key)
            .or(self.default_resolver.as_ref())
            .cloned()
    }

    /// Sets the default resolver.
    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.default_resolver = Some(Arc::new(resolver));
    }

    /// Removes the default resolver.
    pub fn remove_default(&mut self) {
        self.default_resolver = None;
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .field("has_default", &self.default_resolver.is_some())
            .finish()
    }
}
