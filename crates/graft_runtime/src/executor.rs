//! Query execution for graft.
//!
//! The executor walks an operation's selection sets against a built
//! [`Schema`]. Sibling fields run concurrently (mutation root fields run
//! one after another), every field goes through its compiled
//! [`FieldDelegate`], and failures become [`GraphQLError`] records at the
//! field's path while the rest of the response keeps resolving.
//!
//! A null in a non-null position nulls the nearest nullable ancestor. The
//! error is recorded once, at the field that produced the null.

use crate::batch::{BatchDispatcher, BatchScheduler, ContextToken, ExecutionUnit, NoopBatchScheduler};
use crate::config::ExecutorConfig;
use crate::context::{FieldContext, RequestData, RequestScope, ResolverInfo, Variables};
use crate::dataloader::{BatchLoader, LoaderRegistry, LoaderScope};
use crate::limit::FieldLimiter;
use crate::middleware::{FieldDelegate, FieldOutcome};
use crate::operation::{Field, Operation, OperationKind, SelectionSet};
use crate::resolver::ResolverArgs;
use crate::schema::{Schema, SchemaType, TypeId, TypeRef};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use graft_core::{AggregateError, ErrorBuilder, ErrorCode, GraphQLError, Path};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// A request to execute.
#[derive(Debug)]
pub struct Request {
    operation: Operation,
    variables: Variables,
    root_value: Value,
    data: RequestData,
    cancellation: CancellationToken,
}

impl Request {
    /// Creates a request for an operation.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            variables: Variables::new(),
            root_value: Value::Object(serde_json::Map::new()),
            data: RequestData::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Sets the coerced variables.
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Sets one variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Sets the value root fields resolve against.
    pub fn with_root_value(mut self, root_value: Value) -> Self {
        self.root_value = root_value;
        self
    }

    /// Sets the request data available to resolvers.
    pub fn with_data(mut self, data: RequestData) -> Self {
        self.data = data;
        self
    }

    /// Sets the cancellation signal.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// A GraphQL response.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// The data; `None` when a null reached the root.
    pub data: Option<Value>,
    /// The errors, ordered by path.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl Response {
    /// Returns true if the response has errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns true if the response has data.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// The query executor.
pub struct Executor {
    schema: Arc<Schema>,
    config: ExecutorConfig,
    loaders: Arc<LoaderRegistry>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("loaders", &self.loaders)
            .finish()
    }
}

impl Executor {
    /// Creates an executor for a schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            config: ExecutorConfig::default(),
            loaders: Arc::new(LoaderRegistry::new()),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a data loader; every request gets its own instance.
    pub fn with_loader<L: BatchLoader>(mut self, loader: L) -> Self {
        Arc::make_mut(&mut self.loaders).register(loader);
        self
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes a request.
    pub async fn execute(&self, request: Request) -> Response {
        let Request {
            operation,
            variables,
            root_value,
            data,
            cancellation,
        } = request;
        self.run(Arc::new(operation), variables, root_value, data, cancellation)
            .await
    }

    /// Executes an operation.
    pub async fn execute_operation(
        &self,
        operation: &Operation,
        variables: Variables,
        root_value: Value,
        cancellation: CancellationToken,
    ) -> Response {
        self.run(
            Arc::new(operation.clone()),
            variables,
            root_value,
            RequestData::new(),
            cancellation,
        )
        .await
    }

    async fn run(
        &self,
        operation: Arc<Operation>,
        variables: Variables,
        root_value: Value,
        data: RequestData,
        cancellation: CancellationToken,
    ) -> Response {
        let span = tracing::debug_span!(
            "operation",
            name = operation.name.as_deref().unwrap_or("<anonymous>"),
            kind = %operation.kind,
        );

        async move {
            let Some(root) = self.schema.root_type(operation.kind) else {
                let error = GraphQLError::new(format!(
                    "Schema is not configured to execute {} operations.",
                    operation.kind
                ));
                return Response {
                    data: None,
                    errors: vec![error],
                };
            };
            if operation.kind == OperationKind::Subscription {
                let error = GraphQLError::new("Subscriptions cannot be executed as a single result.");
                return Response {
                    data: None,
                    errors: vec![error],
                };
            }

            let dispatcher = self
                .config
                .enable_batching
                .then(|| Arc::new(BatchDispatcher::new()));
            let scheduler: Arc<dyn BatchScheduler> = match &dispatcher {
                Some(dispatcher) => Arc::clone(dispatcher) as Arc<dyn BatchScheduler>,
                None => Arc::new(NoopBatchScheduler),
            };
            let request = Arc::new(RequestScope {
                variables,
                data,
                loaders: LoaderScope::new(
                    Arc::clone(&self.loaders),
                    Arc::clone(&scheduler),
                    ContextToken::next(),
                ),
                cancellation: cancellation.clone(),
            });
            let state = Arc::new(ExecutionState {
                schema: Arc::clone(&self.schema),
                config: self.config.clone(),
                operation,
                request,
                errors: Mutex::new(Vec::new()),
                limiter: self.config.max_concurrent_fields.map(FieldLimiter::new),
                scheduler,
            });

            let root_future = execute_root(Arc::clone(&state), root, Arc::new(root_value));
            let completion = match dispatcher {
                Some(dispatcher) => match dispatcher.drive(root_future, &cancellation).await {
                    Ok(completion) => completion,
                    Err(error) => {
                        let error = GraphQLError::from_error(error).with_code(ErrorCode::InternalError);
                        state.errors.lock().await.push(error);
                        Err(Nulled)
                    }
                },
                None => root_future.await,
            };

            let errors = std::mem::take(&mut *state.errors.lock().await);
            let errors = finish_errors(errors, state.config.include_error_codes);
            tracing::debug!(errors = errors.len(), "operation finished");

            Response {
                data: completion.ok(),
                errors,
            }
        }
        .instrument(span)
        .await
    }
}

/// A null reached a non-null position; the error is already recorded.
#[derive(Debug)]
struct Nulled;

type Completion = Result<Value, Nulled>;

type GroupedFields = Vec<(String, Vec<Arc<Field>>)>;

struct ExecutionState {
    schema: Arc<Schema>,
    config: ExecutorConfig,
    operation: Arc<Operation>,
    request: Arc<RequestScope>,
    errors: Mutex<Vec<GraphQLError>>,
    limiter: Option<FieldLimiter>,
    scheduler: Arc<dyn BatchScheduler>,
}

impl ExecutionState {
    /// Records a field error at `path`, expanding aggregates.
    async fn record(&self, error: GraphQLError, path: &Path, fields: &[Arc<Field>]) {
        let aggregate = error
            .error_source()
            .and_then(|source| source.downcast_ref::<AggregateError>())
            .map(|aggregate| aggregate.errors().to_vec());
        let errors = aggregate.unwrap_or_else(|| vec![error]);

        let mut recorded = self.errors.lock().await;
        for error in errors {
            let mut error = error;
            if error.path().is_none() {
                error = error.with_path(path.clone());
            }
            if error.locations().is_empty() {
                let locations = fields.iter().filter_map(|field| field.location);
                error = error.with_locations(locations);
            }
            tracing::debug!(path = %path, message = error.message(), "field error");
            recorded.push(error);
        }
    }

    fn collect<'a>(
        &'a self,
        object: TypeId,
        selection_sets: impl IntoIterator<Item = &'a SelectionSet>,
    ) -> GroupedFields {
        self.operation
            .collect_fields(&self.schema, object, selection_sets)
            .into_iter()
            .map(|(key, fields)| (key.to_string(), fields.into_iter().cloned().collect()))
            .collect()
    }

    fn is_non_null_field(&self, object: TypeId, field: &Field) -> bool {
        self.schema
            .object(object)
            .and_then(|o| o.fields.get(&field.name))
            .is_some_and(|def| def.ty.is_non_null())
    }
}

/// Where a value is being completed.
struct FieldSite {
    parent_type: String,
    field_name: String,
    fields: Vec<Arc<Field>>,
}

fn execute_root(state: Arc<ExecutionState>, root: TypeId, root_value: Arc<Value>) -> BoxFuture<'static, Completion> {
    let grouped = state.collect(root, std::iter::once(&state.operation.selection_set));
    let serial = state.operation.kind == OperationKind::Mutation;
    execute_fields(state, root, root_value, grouped, Path::root(), serial)
}

/// Executes the grouped fields of one object.
fn execute_fields(
    state: Arc<ExecutionState>,
    object: TypeId,
    parent: Arc<Value>,
    grouped: GroupedFields,
    path: Path,
    serial: bool,
) -> BoxFuture<'static, Completion> {
    Box::pin(async move {
        let mut result = serde_json::Map::with_capacity(grouped.len());

        if serial {
            for (key, fields) in grouped {
                let value = execute_field(
                    Arc::clone(&state),
                    object,
                    Arc::clone(&parent),
                    fields,
                    path.clone(),
                )
                .await?;
                result.insert(key, value);
            }
            return Ok(Value::Object(result));
        }

        let completions = match state.scheduler.runtime_handle() {
            Some(handle) if state.config.parallel_fields => {
                let mut handles = Vec::with_capacity(grouped.len());
                for (key, fields) in grouped {
                    let first = Arc::clone(&fields[0]);
                    let future = execute_field(
                        Arc::clone(&state),
                        object,
                        Arc::clone(&parent),
                        fields,
                        path.clone(),
                    );
                    let unit = ExecutionUnit::new(Arc::clone(&state.scheduler), future)
                        .map(|unit| handle.spawn(unit))
                        .map_err(|e| GraphQLError::from_error(e).with_code(ErrorCode::InternalError));
                    handles.push((key, first, unit));
                }

                let mut completions = Vec::with_capacity(handles.len());
                for (key, first, unit) in handles {
                    let failure = match unit {
                        Ok(join) => match join.await {
                            Ok(completion) => {
                                completions.push((key, completion));
                                continue;
                            }
                            Err(e) => GraphQLError::new(format!("Parallel execution failed: {e}"))
                                .with_code(ErrorCode::InternalError),
                        },
                        Err(error) => error,
                    };
                    let field_path = path.append_field(key.as_str());
                    state.record(failure, &field_path, std::slice::from_ref(&first)).await;
                    let completion = if state.is_non_null_field(object, &first) {
                        Err(Nulled)
                    } else {
                        Ok(Value::Null)
                    };
                    completions.push((key, completion));
                }
                completions
            }
            _ => {
                join_all(grouped.into_iter().map(|(key, fields)| {
                    let future = execute_field(
                        Arc::clone(&state),
                        object,
                        Arc::clone(&parent),
                        fields,
                        path.clone(),
                    );
                    async move { (key, future.await) }
                }))
                .await
            }
        };

        let mut nulled = false;
        for (key, completion) in completions {
            match completion {
                Ok(value) => {
                    result.insert(key, value);
                }
                Err(Nulled) => nulled = true,
            }
        }
        if nulled {
            Err(Nulled)
        } else {
            Ok(Value::Object(result))
        }
    })
}

/// Resolves and completes one response key.
fn execute_field(
    state: Arc<ExecutionState>,
    object: TypeId,
    parent: Arc<Value>,
    fields: Vec<Arc<Field>>,
    parent_path: Path,
) -> BoxFuture<'static, Completion> {
    Box::pin(async move {
        let Some(field) = fields.first().cloned() else {
            return Ok(Value::Null);
        };
        let path = parent_path.append_field(field.response_key());
        let Some(object_type) = state.schema.object(object) else {
            let error = GraphQLError::new("Fields can only be selected on object types.")
                .with_code(ErrorCode::InternalError);
            state.record(error, &path, &fields).await;
            return Ok(Value::Null);
        };

        if field.name == "__typename" {
            return Ok(Value::String(object_type.name.clone()));
        }

        let Some(def) = object_type.fields.get(&field.name) else {
            let error = GraphQLError::new(format!(
                "Cannot query field \"{}\" on type \"{}\".",
                field.name, object_type.name
            ));
            state.record(error, &path, &fields).await;
            return Ok(Value::Null);
        };

        let info = ResolverInfo::new(field.name.clone(), object_type.name.clone())
            .with_response_key(field.response_key())
            .with_return_type(def.declared.to_string());
        let mut args = ResolverArgs::from_pairs(field.arguments.clone());
        for (name, value) in &def.argument_defaults {
            args.set_default(name, value);
        }
        let ctx = FieldContext::for_field(Arc::clone(&state.request), info, parent, args, path.clone());

        tracing::trace!(path = %path, "resolving field");
        let value = match resolve(&state, &def.delegate, &ctx).await {
            Ok(value) => value,
            Err(error) => {
                state.record(error, &path, &fields).await;
                return if def.ty.is_non_null() {
                    Err(Nulled)
                } else {
                    Ok(Value::Null)
                };
            }
        };

        let site = Arc::new(FieldSite {
            parent_type: object_type.name.clone(),
            field_name: field.name.clone(),
            fields,
        });
        complete_value(state.clone(), def.ty.clone(), site, path, value).await
    })
}

/// Runs a field's delegate under the configured limits.
async fn resolve(
    state: &ExecutionState,
    delegate: &FieldDelegate,
    ctx: &FieldContext,
) -> Result<Value, GraphQLError> {
    let invocation =
        AssertUnwindSafe(async { delegate.invoke(ctx, FieldOutcome::Continue).await }).catch_unwind();
    let guarded = async {
        match state.config.field_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, invocation).await.map_err(|_| {
                GraphQLError::new(format!(
                    "Resolver for {}.{} timed out after {}ms.",
                    ctx.info().parent_type,
                    ctx.field_name(),
                    timeout.as_millis()
                ))
                .with_code(ErrorCode::ResolverTimeout)
            }),
            None => Ok(invocation.await),
        }
    };
    let limited = async {
        match &state.limiter {
            Some(limiter) => limiter.run(guarded).await,
            None => guarded.await,
        }
    };

    tokio::select! {
        biased;
        () = ctx.cancellation().cancelled() => {
            Err(GraphQLError::new("Execution was cancelled.").with_code(ErrorCode::Cancelled))
        }
        result = limited => match result {
            Ok(Ok(outcome)) => outcome.into_result(),
            Ok(Err(panic)) => Err(GraphQLError::new(format!(
                "Resolver panicked: {}",
                panic_message(&*panic)
            ))
            .with_code(ErrorCode::ResolverPanicked)),
            Err(timeout) => Err(timeout),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Completes a resolved value against its declared type.
fn complete_value(
    state: Arc<ExecutionState>,
    ty: TypeRef<TypeId>,
    site: Arc<FieldSite>,
    path: Path,
    value: Value,
) -> BoxFuture<'static, Completion> {
    Box::pin(async move {
        match ty {
            TypeRef::NonNull(inner) => {
                match complete_inner(Arc::clone(&state), *inner, Arc::clone(&site), path.clone(), value).await {
                    Ok(Value::Null) => {
                        let error = GraphQLError::new(format!(
                            "Cannot return null for non-nullable field {}.{}.",
                            site.parent_type, site.field_name
                        ))
                        .with_code(ErrorCode::NonNullViolation);
                        state.record(error, &path, &site.fields).await;
                        Err(Nulled)
                    }
                    other => other,
                }
            }
            nullable => Ok(complete_inner(state, nullable, site, path, value)
                .await
                .unwrap_or(Value::Null)),
        }
    })
}

/// Completes a value in a position that is not wrapped in non-null.
async fn complete_inner(
    state: Arc<ExecutionState>,
    ty: TypeRef<TypeId>,
    site: Arc<FieldSite>,
    path: Path,
    value: Value,
) -> Completion {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let id = match ty {
        TypeRef::NonNull(_) => return complete_value(state, ty, site, path, value).await,
        TypeRef::List(item_ty) => return complete_list(state, *item_ty, site, path, value).await,
        TypeRef::Named(id) => id,
    };

    let invalid = |message: String, code: ErrorCode| GraphQLError::new(message).with_code(code);
    let object = match state.schema.type_by_id(id) {
        SchemaType::Scalar(scalar) => {
            return match scalar.serialize(value) {
                Ok(value) => Ok(value),
                Err(message) => {
                    state.record(invalid(message, ErrorCode::InvalidValue), &path, &site.fields).await;
                    Err(Nulled)
                }
            };
        }
        SchemaType::Enum(def) => {
            return match def.serialize(value) {
                Ok(value) => Ok(value),
                Err(message) => {
                    state.record(invalid(message, ErrorCode::InvalidValue), &path, &site.fields).await;
                    Err(Nulled)
                }
            };
        }
        SchemaType::Object(_) => id,
        SchemaType::Interface(abstract_type) | SchemaType::Union(abstract_type) => {
            match state.schema.resolve_abstract(id, &value) {
                Some(object) => object,
                None => {
                    let message = format!(
                        "Abstract type \"{}\" must resolve to an object type at runtime for field {}.{}.",
                        abstract_type.name, site.parent_type, site.field_name
                    );
                    state
                        .record(invalid(message, ErrorCode::TypeResolutionFailed), &path, &site.fields)
                        .await;
                    return Err(Nulled);
                }
            }
        }
    };

    if !value.is_object() {
        let message = format!(
            "Expected an object for field {}.{}, found: {value}",
            site.parent_type, site.field_name
        );
        state.record(invalid(message, ErrorCode::InvalidValue), &path, &site.fields).await;
        return Err(Nulled);
    }

    let grouped = state.collect(object, site.fields.iter().map(|field| &field.selection_set));
    execute_fields(state, object, Arc::new(value), grouped, path, false).await
}

/// Completes each list item at its own indexed path.
async fn complete_list(
    state: Arc<ExecutionState>,
    item_ty: TypeRef<TypeId>,
    site: Arc<FieldSite>,
    path: Path,
    value: Value,
) -> Completion {
    let items = match value {
        Value::Array(items) => items,
        other => {
            let message = format!(
                "Expected a list for field {}.{}, found: {other}",
                site.parent_type, site.field_name
            );
            let error = GraphQLError::new(message).with_code(ErrorCode::InvalidValue);
            state.record(error, &path, &site.fields).await;
            return Err(Nulled);
        }
    };

    let mut futures = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let item_path = match path.append_index(index) {
            Ok(item_path) => item_path,
            Err(error) => {
                let error = GraphQLError::from_error(error).with_code(ErrorCode::InternalError);
                state.record(error, &path, &site.fields).await;
                return Err(Nulled);
            }
        };
        futures.push(complete_value(
            Arc::clone(&state),
            item_ty.clone(),
            Arc::clone(&site),
            item_path,
            item,
        ));
    }

    join_all(futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Orders errors by path and applies the error code policy.
fn finish_errors(mut errors: Vec<GraphQLError>, include_codes: bool) -> Vec<GraphQLError> {
    errors.sort_by(|a, b| a.path().cmp(&b.path()));
    if include_codes {
        return errors;
    }
    errors
        .into_iter()
        .map(|error| {
            if error.code().is_none() {
                return error;
            }
            ErrorBuilder::from_error(&error)
                .remove_extension("code")
                .build()
                .unwrap_or(error)
        })
        .collect()
}
