//! Runtime for graft.
//!
//! This crate provides the GraphQL execution runtime:
//! - `schema`: Type registry, linked in two phases
//! - `operation`: Validated operations and field collection
//! - `executor`: Selection-set execution and non-null propagation
//! - `middleware`: Compiled field middleware pipelines
//! - `resolver`: Resolver traits and the resolver map
//! - `batch`: Per-request batch scheduling
//! - `dataloader`: DataLoader for N+1 prevention
//! - `context`: Request and field contexts
//! - `limit`: Resolver concurrency limit
//! - `config`: Executor configuration

pub mod batch;
pub mod config;
pub mod context;
pub mod dataloader;
pub mod executor;
mod limit;
pub mod middleware;
pub mod operation;
pub mod resolver;
pub mod schema;

pub use batch::{
    BatchDispatcher, BatchScheduler, ContextToken, ExecutionUnit, NoopBatchScheduler,
    PendingBatch, PendingBatchKey, RegistrationError,
};
pub use config::ExecutorConfig;
pub use context::{FieldContext, RequestData, ResolverInfo, Variables};
pub use dataloader::{
    create_loader, BatchLoader, BatchResult, DataLoader, FnLoader, LoadError, LoaderRegistry,
    LoaderScope,
};
pub use executor::{Executor, Request, Response};
pub use middleware::{
    DelegateKind, FieldDelegate, FieldMiddleware, FieldOutcome, FnMiddleware, SharedMiddleware,
};
pub use operation::{
    Field, FragmentDefinition, FragmentSpread, InlineFragment, Operation, OperationKind,
    Selection, SelectionSet,
};
pub use resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, Resolver, ResolverArgs, ResolverError,
    ResolverFuture, ResolverMap, ResolverResult, SharedResolver,
};
pub use schema::{
    AbstractType, EnumDef, FieldDef, InterfaceDef, ObjectDef, ObjectType, ScalarDef, ScalarKind,
    Schema, SchemaBuilder, SchemaError, SchemaField, SchemaType, TypeDef, TypeId, TypeRef,
    TypeResolver, UnionDef,
};
