//! Integration tests for selection-set execution.

use graft_core::{AggregateError, GraphQLError, Location};
use graft_runtime::{
    Executor, ExecutorConfig, Field, FieldDef, FieldOutcome, FnMiddleware, FragmentDefinition,
    FragmentSpread, InlineFragment, InterfaceDef, ObjectDef, Operation, Request, RequestData,
    ResolverError, Schema, SchemaBuilder, TypeRef, UnionDef,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn named(name: &str) -> TypeRef {
    TypeRef::named(name)
}

fn non_null(name: &str) -> TypeRef {
    TypeRef::non_null(TypeRef::named(name))
}

fn configs() -> Vec<ExecutorConfig> {
    vec![
        ExecutorConfig::default(),
        ExecutorConfig::default().with_parallel_fields(false),
        ExecutorConfig::default().with_batching(false),
    ]
}

fn parent_schema(parent_ty: TypeRef) -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .query_type("Query")
            .add_type(
                ObjectDef::new("Query")
                    .field(FieldDef::new("parent", parent_ty).resolve_fn(|_| Ok(json!({}))))
                    .field(FieldDef::new("other", named("String")).resolve_fn(|_| Ok(json!("still here")))),
            )
            .add_type(
                ObjectDef::new("Parent")
                    .field(
                        FieldDef::new("nonNullChild", non_null("String"))
                            .resolve_fn(|_| Err(ResolverError::custom("child failed"))),
                    )
                    .field(FieldDef::new("missing", non_null("String")))
                    .field(FieldDef::new("sibling", named("String")).resolve_fn(|_| Ok(json!("ok")))),
            )
            .build()
            .unwrap(),
    )
}

/// A failing non-null child nulls its nullable parent, with one error at the child's path.
#[tokio::test]
async fn test_non_null_child_nulls_nullable_parent() {
    for config in configs() {
        let executor = Executor::new(parent_schema(named("Parent"))).with_config(config);
        let op = Operation::query()
            .select(
                Field::new("parent")
                    .select(Field::new("nonNullChild"))
                    .select(Field::new("sibling")),
            )
            .select(Field::new("other"));

        let response = executor.execute(Request::new(op)).await;

        assert_eq!(
            response.data,
            Some(json!({"parent": null, "other": "still here"}))
        );
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message(), "child failed");
        assert_eq!(
            response.errors[0].path().unwrap().print(),
            "/parent/nonNullChild"
        );
        assert_eq!(response.errors[0].code(), Some("RESOLVER_ERROR"));
    }
}

/// When the parent is non-null too, the null reaches the root and data becomes null.
#[tokio::test]
async fn test_non_null_chain_nulls_data() {
    for config in configs() {
        let executor = Executor::new(parent_schema(non_null("Parent"))).with_config(config);
        let op = Operation::query()
            .select(Field::new("parent").select(Field::new("nonNullChild")))
            .select(Field::new("other"));

        let response = executor.execute(Request::new(op)).await;

        assert_eq!(response.data, None);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(
            response.errors[0].path().unwrap().print(),
            "/parent/nonNullChild"
        );

        let serialized = serde_json::to_value(&response).unwrap();
        assert_eq!(serialized["data"], json!(null));
    }
}

/// An explicit null for a non-null field is reported as a violation of that field.
#[tokio::test]
async fn test_explicit_null_in_non_null_field() {
    let executor = Executor::new(parent_schema(named("Parent")));
    let op = Operation::query().select(Field::new("parent").select(Field::new("missing")));

    let response = executor.execute(Request::new(op)).await;

    assert_eq!(response.data, Some(json!({"parent": null})));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].message(),
        "Cannot return null for non-nullable field Parent.missing."
    );
    assert_eq!(response.errors[0].code(), Some("NON_NULL_VIOLATION"));
    assert_eq!(response.errors[0].path().unwrap().print(), "/parent/missing");
}

/// A global middleware that produces a value keeps the resolver from running.
#[tokio::test]
async fn test_middleware_short_circuit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let schema = SchemaBuilder::new()
        .query_type("Query")
        .middleware(FnMiddleware::new(|ctx, outcome, next| {
            Box::pin(async move {
                if ctx.field_name() == "secret" {
                    return FieldOutcome::Modified(json!("redacted"));
                }
                next.invoke(ctx, outcome).await
            })
        }))
        .add_type(
            ObjectDef::new("Query")
                .field(FieldDef::new("secret", named("String")).resolve_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("classified"))
                }))
                .field(FieldDef::new("public", named("String")).resolve_fn(|_| Ok(json!("hello")))),
        )
        .build()
        .unwrap();

    let executor = Executor::new(Arc::new(schema));
    let op = Operation::query()
        .select(Field::new("secret"))
        .select(Field::new("public"));
    let response = executor.execute(Request::new(op)).await;

    assert_eq!(
        response.data,
        Some(json!({"secret": "redacted", "public": "hello"}))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Field middleware wraps the resolver; skipped fields bypass every stage.
#[tokio::test]
async fn test_field_middleware_and_skip() {
    let shout = || {
        FnMiddleware::new(|ctx, outcome, next| {
            Box::pin(async move {
                match next.invoke(ctx, outcome).await {
                    FieldOutcome::Modified(serde_json::Value::String(s)) => {
                        FieldOutcome::Modified(json!(s.to_uppercase()))
                    }
                    other => other,
                }
            })
        })
    };

    let schema = SchemaBuilder::new()
        .query_type("Query")
        .middleware(shout())
        .add_type(
            ObjectDef::new("Query")
                .field(FieldDef::new("loud", named("String")).resolve_fn(|_| Ok(json!("hey"))))
                .field(
                    FieldDef::new("quiet", named("String"))
                        .resolve_fn(|_| Ok(json!("psst")))
                        .skip_middleware(),
                ),
        )
        .build()
        .unwrap();

    let executor = Executor::new(Arc::new(schema));
    let op = Operation::query()
        .select(Field::new("loud"))
        .select(Field::new("quiet"));
    let response = executor.execute(Request::new(op)).await;

    assert_eq!(response.data, Some(json!({"loud": "HEY", "quiet": "psst"})));
}

fn logging_field(name: &'static str, delay_ms: u64, log: &Arc<Mutex<Vec<&'static str>>>) -> FieldDef {
    let log = Arc::clone(log);
    FieldDef::new(name, named("String")).resolve_async(move |_ctx| {
        let log = Arc::clone(&log);
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            log.lock().unwrap().push(name);
            Ok(json!(name))
        }
    })
}

fn ordering_schema(log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Schema> {
    let fields = |object: ObjectDef| {
        object
            .field(logging_field("first", 40, log))
            .field(logging_field("second", 0, log))
            .field(logging_field("third", 10, log))
    };
    Arc::new(
        SchemaBuilder::new()
            .query_type("Query")
            .mutation_type("Mutation")
            .add_type(fields(ObjectDef::new("Query")))
            .add_type(fields(ObjectDef::new("Mutation")))
            .build()
            .unwrap(),
    )
}

/// Mutation root fields run one after another in document order.
#[tokio::test]
async fn test_mutation_fields_run_serially() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = Executor::new(ordering_schema(&log));
    let op = Operation::mutation()
        .select(Field::new("first"))
        .select(Field::new("second"))
        .select(Field::new("third"));

    let response = executor.execute(Request::new(op)).await;

    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    assert_eq!(
        response.data,
        Some(json!({"first": "first", "second": "second", "third": "third"}))
    );
}

/// Query fields run concurrently but results keep selection order.
#[tokio::test]
async fn test_query_results_keep_selection_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = Executor::new(ordering_schema(&log));
    let op = Operation::query()
        .select(Field::new("first"))
        .select(Field::new("second").alias("2nd"))
        .select(Field::new("third"));

    let response = executor.execute(Request::new(op)).await;

    assert_eq!(*log.lock().unwrap(), vec!["second", "third", "first"]);
    let data = response.data.unwrap();
    let keys: Vec<&String> = data.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["first", "2nd", "third"]);
}

fn list_schema() -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .query_type("Query")
            .add_type(
                ObjectDef::new("Query")
                    .field(
                        FieldDef::new("numbers", TypeRef::list(named("Int")))
                            .resolve_fn(|_| Ok(json!([1, "x", 3]))),
                    )
                    .field(
                        FieldDef::new("strictNumbers", TypeRef::list(non_null("Int")))
                            .resolve_fn(|_| Ok(json!([1, null, 3]))),
                    )
                    .field(
                        FieldDef::new("users", TypeRef::parse("[User!]!").unwrap())
                            .resolve_fn(|_| Ok(json!([{"name": "Ada"}, {"name": "Grace"}]))),
                    ),
            )
            .add_type(ObjectDef::new("User").field(FieldDef::new("name", non_null("String"))))
            .build()
            .unwrap(),
    )
}

/// Nullable list items fail individually at their indexed path.
#[tokio::test]
async fn test_list_item_errors() {
    let executor = Executor::new(list_schema());
    let op = Operation::query()
        .select(Field::new("numbers"))
        .select(Field::new("strictNumbers"));

    let response = executor.execute(Request::new(op)).await;

    assert_eq!(
        response.data,
        Some(json!({"numbers": [1, null, 3], "strictNumbers": null}))
    );
    let paths: Vec<String> = response
        .errors
        .iter()
        .map(|e| e.path().unwrap().print())
        .collect();
    assert_eq!(paths, vec!["/numbers[1]", "/strictNumbers[1]"]);
    assert_eq!(response.errors[0].code(), Some("INVALID_VALUE"));
    assert_eq!(
        response.errors[1].message(),
        "Cannot return null for non-nullable field Query.strictNumbers."
    );
}

/// Lists of objects complete each element with the merged sub-selection.
#[tokio::test]
async fn test_list_of_objects_with_aliases() {
    let executor = Executor::new(list_schema());
    let op = Operation::query().select(
        Field::new("users")
            .alias("people")
            .select(Field::new("name"))
            .select(Field::new("name").alias("label"))
            .select(Field::new("__typename")),
    );

    let response = executor.execute(Request::new(op)).await;

    assert!(!response.has_errors());
    assert_eq!(
        response.data,
        Some(json!({
            "people": [
                {"name": "Ada", "label": "Ada", "__typename": "User"},
                {"name": "Grace", "label": "Grace", "__typename": "User"}
            ]
        }))
    );
}

/// A deserialized resolver limit of zero still lets fields run.
#[tokio::test]
async fn test_zero_resolver_limit_from_config() {
    let config: ExecutorConfig = serde_json::from_str(r#"{"max_concurrent_fields": 0}"#).unwrap();
    let executor = Executor::new(list_schema()).with_config(config);
    let op = Operation::query().select(Field::new("users").select(Field::new("name")));

    let response = tokio::time::timeout(Duration::from_secs(3), executor.execute(Request::new(op)))
        .await
        .unwrap();

    assert!(!response.has_errors());
    assert_eq!(
        response.data,
        Some(json!({"users": [{"name": "Ada"}, {"name": "Grace"}]}))
    );
}

/// Interfaces and unions resolve to concrete object types.
#[tokio::test]
async fn test_abstract_types() {
    let schema = SchemaBuilder::new()
        .query_type("Query")
        .add_type(InterfaceDef::new("Node"))
        .add_type(
            ObjectDef::new("User")
                .implements("Node")
                .field(FieldDef::new("id", non_null("ID")))
                .field(FieldDef::new("name", named("String"))),
        )
        .add_type(
            ObjectDef::new("Post")
                .implements("Node")
                .field(FieldDef::new("id", non_null("ID")))
                .field(FieldDef::new("title", named("String"))),
        )
        .add_type(
            UnionDef::new("Attachment", ["User", "Post"]).resolve_type(|value| {
                let kind = value.get("kind")?.as_str()?;
                Some(if kind == "person" { "User" } else { "Post" }.to_string())
            }),
        )
        .add_type(
            ObjectDef::new("Query")
                .field(FieldDef::new("nodes", TypeRef::list(named("Node"))).resolve_fn(|_| {
                    Ok(json!([
                        {"__typename": "User", "id": "1", "name": "Ada"},
                        {"__typename": "Post", "id": 2, "title": "Hello"},
                        {"__typename": "Ghost", "id": "3"}
                    ]))
                }))
                .field(
                    FieldDef::new("attachment", named("Attachment"))
                        .resolve_fn(|_| Ok(json!({"kind": "person", "id": "9", "name": "Lin"}))),
                ),
        )
        .build()
        .unwrap();

    let executor = Executor::new(Arc::new(schema));
    let op = Operation::query()
        .fragment(FragmentDefinition::new("PostParts", "Post").select(Field::new("title")))
        .select(
            Field::new("nodes")
                .select(Field::new("__typename"))
                .select(Field::new("id"))
                .select(InlineFragment::on("User").select(Field::new("name")))
                .select(FragmentSpread::new("PostParts")),
        )
        .select(
            Field::new("attachment")
                .select(InlineFragment::on("User").select(Field::new("name")))
                .select(InlineFragment::on("Post").select(Field::new("title"))),
        );

    let response = executor.execute(Request::new(op)).await;

    assert_eq!(
        response.data,
        Some(json!({
            "nodes": [
                {"__typename": "User", "id": "1", "name": "Ada"},
                {"__typename": "Post", "id": "2", "title": "Hello"},
                null
            ],
            "attachment": {"name": "Lin"}
        }))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code(), Some("TYPE_RESOLUTION_FAILED"));
    assert_eq!(response.errors[0].path().unwrap().print(), "/nodes[2]");
}

fn slow_schema() -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .query_type("Query")
            .add_type(
                ObjectDef::new("Query")
                    .field(FieldDef::new("slow", named("String")).resolve_async(|_ctx| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(json!("finally"))
                    }))
                    .field(FieldDef::new("fast", named("String")).resolve_fn(|_| Ok(json!("ok")))),
            )
            .build()
            .unwrap(),
    )
}

/// A resolver exceeding the field timeout fails with a timeout error.
#[tokio::test]
async fn test_field_timeout() {
    let config = ExecutorConfig::default().with_field_timeout(Duration::from_millis(20));
    let executor = Executor::new(slow_schema()).with_config(config);
    let op = Operation::query()
        .select(Field::new("slow"))
        .select(Field::new("fast"));

    let response = executor.execute(Request::new(op)).await;

    assert_eq!(response.data, Some(json!({"slow": null, "fast": "ok"})));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code(), Some("RESOLVER_TIMEOUT"));
    assert_eq!(response.errors[0].path().unwrap().print(), "/slow");
}

/// Cancelling the request abandons in-flight resolvers.
#[tokio::test]
async fn test_cancellation() {
    let executor = Executor::new(slow_schema());
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let op = Operation::query().select(Field::new("slow"));
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        executor.execute_operation(&op, serde_json::Map::new(), json!({}), token),
    )
    .await
    .unwrap();

    assert_eq!(response.data, Some(json!({"slow": null})));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code(), Some("CANCELLED"));
}

fn panicking_schema() -> Arc<Schema> {
    Arc::new(
        SchemaBuilder::new()
            .query_type("Query")
            .add_type(
                ObjectDef::new("Query")
                    .field(FieldDef::new("boom", named("String")).resolve_fn(|_| panic!("kaboom")))
                    .field(FieldDef::new("fine", named("String")).resolve_fn(|_| Ok(json!("fine")))),
            )
            .build()
            .unwrap(),
    )
}

/// A panicking resolver becomes a field error instead of failing the request.
#[tokio::test]
async fn test_resolver_panic_is_captured() {
    for config in configs() {
        let executor = Executor::new(panicking_schema()).with_config(config);
        let op = Operation::query()
            .select(Field::new("boom"))
            .select(Field::new("fine"));
        let response = executor.execute(Request::new(op)).await;

        assert_eq!(response.data, Some(json!({"boom": null, "fine": "fine"})));
        assert_eq!(response.errors[0].message(), "Resolver panicked: kaboom");
        assert_eq!(response.errors[0].code(), Some("RESOLVER_PANICKED"));
    }
}

/// Aggregate errors are reported as separate errors at the field's path.
#[tokio::test]
async fn test_aggregate_errors_are_expanded() {
    let schema = SchemaBuilder::new()
        .query_type("Query")
        .add_type(ObjectDef::new("Query").field(
            FieldDef::new("multi", named("String")).resolve_fn(|_| {
                let aggregate =
                    AggregateError::new([GraphQLError::new("first"), GraphQLError::new("second")])
                        .unwrap();
                Err(aggregate.into())
            }),
        ))
        .build()
        .unwrap();

    let executor = Executor::new(Arc::new(schema));
    let op = Operation::query().select(Field::new("multi").at(Location::new(2, 3).unwrap()));
    let response = executor.execute(Request::new(op)).await;

    let messages: Vec<&str> = response.errors.iter().map(GraphQLError::message).collect();
    assert_eq!(messages, vec!["first", "second"]);
    for error in &response.errors {
        assert_eq!(error.path().unwrap().print(), "/multi");
        assert_eq!(error.locations()[0].line(), 2);
    }
}

/// Variables, request data and argument defaults reach resolvers.
#[tokio::test]
async fn test_request_context_reaches_resolvers() {
    struct Viewer(&'static str);

    let schema = SchemaBuilder::new()
        .query_type("Query")
        .add_type(
            ObjectDef::new("Query")
                .field(FieldDef::new("viewer", named("String")).resolve_fn(|ctx| {
                    Ok(json!(ctx.data::<Viewer>().map(|v| v.0)))
                }))
                .field(
                    FieldDef::new("echo", named("String"))
                        .resolve_fn(|ctx| Ok(ctx.variable("message").cloned().unwrap_or_default())),
                )
                .field(
                    FieldDef::new("limit", named("Int"))
                        .argument_default("first", json!(10))
                        .resolve_fn(|ctx| Ok(json!(ctx.args().get_as::<i64>("first")))),
                ),
        )
        .build()
        .unwrap();

    let executor = Executor::new(Arc::new(schema));
    let op = Operation::query()
        .select(Field::new("viewer"))
        .select(Field::new("echo"))
        .select(Field::new("limit"))
        .select(Field::new("limit").alias("limit5").argument("first", json!(5)));
    let request = Request::new(op)
        .with_variable("message", json!("hi"))
        .with_data(RequestData::new().with(Viewer("ada")));

    let response = executor.execute(request).await;

    assert_eq!(
        response.data,
        Some(json!({"viewer": "ada", "echo": "hi", "limit": 10, "limit5": 5}))
    );
}

/// Error codes can be left out of responses.
#[tokio::test]
async fn test_error_serialization() {
    let op = Operation::query().select(
        Field::new("parent")
            .select(Field::new("nonNullChild").at(Location::new(1, 10).unwrap())),
    );

    let executor = Executor::new(parent_schema(named("Parent")));
    let response = executor.execute(Request::new(op.clone())).await;
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "data": {"parent": null},
            "errors": [{
                "message": "child failed",
                "locations": [{"line": 1, "column": 10}],
                "path": ["parent", "nonNullChild"],
                "extensions": {"code": "RESOLVER_ERROR"}
            }]
        })
    );

    let executor = Executor::new(parent_schema(named("Parent")))
        .with_config(ExecutorConfig::default().with_error_codes(false));
    let response = executor.execute(Request::new(op)).await;
    let serialized = serde_json::to_value(&response).unwrap();
    assert!(serialized["errors"][0].get("extensions").is_none());
}

/// Multi-threaded execution yields the same results as the single-threaded runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_thread_runtime() {
    let executor = Executor::new(parent_schema(named("Parent")));
    for _ in 0..20 {
        let op = Operation::query()
            .select(
                Field::new("parent")
                    .select(Field::new("sibling"))
                    .select(Field::new("nonNullChild")),
            )
            .select(Field::new("other"));
        let response = executor.execute(Request::new(op)).await;
        assert_eq!(
            response.data,
            Some(json!({"parent": null, "other": "still here"}))
        );
        assert_eq!(response.errors.len(), 1);
    }
}
