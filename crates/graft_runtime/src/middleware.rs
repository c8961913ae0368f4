//! Field middleware pipeline.
//!
//! Every schema field owns a [`FieldDelegate`] compiled once when the schema
//! is built. The delegate is either a direct resolver call, a no-op, or a
//! chain of middleware stages folded around the resolver:
//!
//! ```text
//! global[0] -> global[1] -> ... -> field[0] -> ... -> leaf(resolver)
//! ```
//!
//! Each stage receives the current [`FieldOutcome`] and returns a new one.
//! The leaf only calls the resolver while the outcome is still
//! [`FieldOutcome::Continue`], so the first stage that produces a value or a
//! fault wins.

use crate::context::FieldContext;
use crate::resolver::{ResolverResult, SharedResolver};
use futures::future::{self, BoxFuture};
use graft_core::GraphQLError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The state of a field's result as it flows through the pipeline.
#[derive(Debug, Clone, Default)]
pub enum FieldOutcome {
    /// Nothing has produced a result yet.
    #[default]
    Continue,
    /// A value was produced.
    Modified(Value),
    /// The field failed.
    Faulted(GraphQLError),
}

impl FieldOutcome {
    /// Converts a resolver result into an outcome.
    pub fn from_result(result: ResolverResult) -> Self {
        match result {
            Ok(value) => Self::Modified(value),
            Err(error) => Self::Faulted(error.into()),
        }
    }

    /// Returns true if a value or a fault was produced.
    pub fn is_modified(&self) -> bool {
        !self.is_continue()
    }

    /// Returns true if nothing was produced yet.
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// The produced value, or null if nothing was produced.
    pub fn into_result(self) -> Result<Value, GraphQLError> {
        match self {
            Self::Continue => Ok(Value::Null),
            Self::Modified(value) => Ok(value),
            Self::Faulted(error) => Err(error),
        }
    }
}

/// A stage wrapped around field resolution.
///
/// Implementations decide whether to call `next`. Returning without calling
/// it short-circuits every inner stage including the resolver.
pub trait FieldMiddleware: Send + Sync {
    /// Runs the stage.
    fn invoke<'a>(
        &'a self,
        ctx: &'a FieldContext,
        outcome: FieldOutcome,
        next: &'a FieldDelegate,
    ) -> BoxFuture<'a, FieldOutcome>;
}

/// A shared middleware.
pub type SharedMiddleware = Arc<dyn FieldMiddleware>;

/// Middleware built from a closure.
///
/// # Example
///
/// ```
/// use graft_runtime::{FieldOutcome, FnMiddleware};
///
/// let deny = FnMiddleware::new(|ctx, outcome, next| {
///     Box::pin(async move {
///         if ctx.variable("locked").is_some() {
///             return FieldOutcome::Modified(serde_json::Value::Null);
///         }
///         next.invoke(ctx, outcome).await
///     })
/// });
/// # let _ = deny;
/// ```
pub struct FnMiddleware<F> {
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(&'a FieldContext, FieldOutcome, &'a FieldDelegate) -> BoxFuture<'a, FieldOutcome>
        + Send
        + Sync
        + 'static,
{
    /// Creates middleware from a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> FieldMiddleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a FieldContext, FieldOutcome, &'a FieldDelegate) -> BoxFuture<'a, FieldOutcome>
        + Send
        + Sync
        + 'static,
{
    fn invoke<'a>(
        &'a self,
        ctx: &'a FieldContext,
        outcome: FieldOutcome,
        next: &'a FieldDelegate,
    ) -> BoxFuture<'a, FieldOutcome> {
        (self.func)(ctx, outcome, next)
    }
}

/// The shape of a compiled delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateKind {
    /// Calls the resolver directly.
    Resolver,
    /// Returns the incoming outcome unchanged.
    NoOp,
    /// Runs a middleware chain.
    Pipeline,
}

enum Stage {
    Resolver(SharedResolver),
    NoOp,
    Middleware {
        middleware: SharedMiddleware,
        next: FieldDelegate,
    },
    Leaf(Option<SharedResolver>),
}

/// A compiled, immutable field pipeline.
///
/// Cloning shares the compiled stages.
#[derive(Clone)]
pub struct FieldDelegate {
    kind: DelegateKind,
    stage: Arc<Stage>,
}

impl FieldDelegate {
    /// Compiles the pipeline for one field.
    ///
    /// Global middleware runs outermost, then field middleware, then the
    /// resolver. With `skip_middleware` or no middleware at all the delegate
    /// calls the resolver directly, or does nothing if there is none.
    pub fn compile(
        global: &[SharedMiddleware],
        field: &[SharedMiddleware],
        resolver: Option<SharedResolver>,
        skip_middleware: bool,
    ) -> Self {
        if skip_middleware || (global.is_empty() && field.is_empty()) {
            return match resolver {
                Some(resolver) => Self::resolver(resolver),
                None => Self::noop(),
            };
        }

        let leaf = Self {
            kind: DelegateKind::Pipeline,
            stage: Arc::new(Stage::Leaf(resolver)),
        };
        global
            .iter()
            .chain(field)
            .rev()
            .fold(leaf, |next, middleware| Self {
                kind: DelegateKind::Pipeline,
                stage: Arc::new(Stage::Middleware {
                    middleware: Arc::clone(middleware),
                    next,
                }),
            })
    }

    /// A delegate that calls `resolver` directly.
    pub fn resolver(resolver: SharedResolver) -> Self {
        Self {
            kind: DelegateKind::Resolver,
            stage: Arc::new(Stage::Resolver(resolver)),
        }
    }

    /// A delegate that leaves the outcome unchanged.
    pub fn noop() -> Self {
        Self {
            kind: DelegateKind::NoOp,
            stage: Arc::new(Stage::NoOp),
        }
    }

    /// The delegate's shape.
    pub fn kind(&self) -> DelegateKind {
        self.kind
    }

    /// Runs the delegate.
    ///
    /// A direct resolver delegate replaces the incoming outcome with the
    /// resolver's result.
    pub fn invoke<'a>(
        &'a self,
        ctx: &'a FieldContext,
        outcome: FieldOutcome,
    ) -> BoxFuture<'a, FieldOutcome> {
        match &*self.stage {
            Stage::Resolver(resolver) => {
                Box::pin(async move { FieldOutcome::from_result(resolver.resolve(ctx).await) })
            }
            Stage::Leaf(Some(resolver)) if outcome.is_continue() => {
                Box::pin(async move { FieldOutcome::from_result(resolver.resolve(ctx).await) })
            }
            Stage::Leaf(_) | Stage::NoOp => Box::pin(future::ready(outcome)),
            Stage::Middleware { middleware, next } => middleware.invoke(ctx, outcome, next),
        }
    }

    /// Number of middleware stages in the chain.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut stage = &*self.stage;
        while let Stage::Middleware { next, .. } = stage {
            depth += 1;
            stage = &next.stage;
        }
        depth
    }
}

impl Default for FieldDelegate {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for FieldDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDelegate")
            .field("kind", &self.kind)
            .field("depth", &self.depth())
            .finish()
    }
}
