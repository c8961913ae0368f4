//! Integration tests for data loader batching during execution.

use futures::future::BoxFuture;
use graft_runtime::{
    BatchLoader, BatchResult, Executor, ExecutorConfig, Field, FieldDef, LoadError, ObjectDef,
    Operation, Request, ResolverError, Schema, SchemaBuilder, TypeRef,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KEYS: [i64; 10] = [1, 2, 1, 3, 2, 1, 2, 1, 3, 2];

type CallLog = Arc<Mutex<Vec<Vec<i64>>>>;

struct ValueLoader {
    calls: CallLog,
}

impl BatchLoader for ValueLoader {
    type Key = i64;
    type Value = i64;

    fn load(&self, keys: Vec<i64>) -> BoxFuture<'_, BatchResult<i64, i64>> {
        Box::pin(async move {
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            self.calls.lock().unwrap().push(sorted);
            Ok(keys.into_iter().map(|key| (key, key * 10)).collect())
        })
    }
}

struct LabelLoader {
    calls: CallLog,
}

impl BatchLoader for LabelLoader {
    type Key = i64;
    type Value = String;

    fn load(&self, keys: Vec<i64>) -> BoxFuture<'_, BatchResult<i64, String>> {
        Box::pin(async move {
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            self.calls.lock().unwrap().push(sorted);
            Ok(keys
                .into_iter()
                .map(|value| (value, format!("value {value}")))
                .collect::<HashMap<_, _>>())
        })
    }
}

struct FailingLoader;

impl BatchLoader for FailingLoader {
    type Key = i64;
    type Value = i64;

    fn load(&self, _keys: Vec<i64>) -> BoxFuture<'_, BatchResult<i64, i64>> {
        Box::pin(async { Err(LoadError::failed("storage unavailable")) })
    }
}

fn key_of(parent: &Value) -> Result<i64, ResolverError> {
    parent
        .get("key")
        .and_then(Value::as_i64)
        .ok_or_else(|| ResolverError::custom("item without key"))
}

fn schema() -> Arc<Schema> {
    schema_with_keys(&KEYS)
}

fn schema_with_keys(keys: &[i64]) -> Arc<Schema> {
    let items = keys.iter().map(|key| json!({"key": key})).collect::<Vec<_>>();

    Arc::new(
        SchemaBuilder::new()
            .query_type("Query")
            .add_type(
                ObjectDef::new("Query").field(
                    FieldDef::new("items", TypeRef::list(TypeRef::named("Item")))
                        .resolve_fn(move |_| Ok(Value::Array(items.clone()))),
                ),
            )
            .add_type(
                ObjectDef::new("Item")
                    .field(FieldDef::new("key", TypeRef::named("Int")))
                    .field(
                        FieldDef::new("value", TypeRef::named("Int")).resolve_async(|ctx| async move {
                            let key = key_of(ctx.parent())?;
                            let value = ctx.loader::<ValueLoader>()?.load(key).await?;
                            Ok::<_, ResolverError>(json!(value))
                        }),
                    )
                    .field(
                        FieldDef::new("label", TypeRef::named("String")).resolve_async(|ctx| async move {
                            let key = key_of(ctx.parent())?;
                            let value = ctx.loader::<ValueLoader>()?.load(key).await?;
                            let value = value.ok_or_else(|| ResolverError::custom("no value"))?;
                            let label = ctx.loader::<LabelLoader>()?.load(value).await?;
                            Ok::<_, ResolverError>(json!(label))
                        }),
                    )
                    .field(
                        FieldDef::new("broken", TypeRef::named("Int")).resolve_async(|ctx| async move {
                            let key = key_of(ctx.parent())?;
                            let value = ctx.loader::<FailingLoader>()?.load(key).await?;
                            Ok::<_, ResolverError>(json!(value))
                        }),
                    ),
            )
            .build()
            .unwrap(),
    )
}

fn executor(config: ExecutorConfig, values: &CallLog, labels: &CallLog) -> Executor {
    executor_for(schema(), config, values, labels)
}

fn executor_for(
    schema: Arc<Schema>,
    config: ExecutorConfig,
    values: &CallLog,
    labels: &CallLog,
) -> Executor {
    Executor::new(schema)
        .with_config(config)
        .with_loader(ValueLoader {
            calls: Arc::clone(values),
        })
        .with_loader(LabelLoader {
            calls: Arc::clone(labels),
        })
        .with_loader(FailingLoader)
}

fn expected_values() -> Value {
    let items: Vec<Value> = KEYS
        .iter()
        .map(|key| json!({"key": key, "value": key * 10}))
        .collect();
    json!({ "items": items })
}

async fn assert_single_fetch(config: ExecutorConfig) {
    let values = CallLog::default();
    let labels = CallLog::default();
    let executor = executor(config, &values, &labels);
    let op = Operation::query()
        .select(Field::new("items").select(Field::new("key")).select(Field::new("value")));

    let response = executor.execute(Request::new(op)).await;

    assert!(!response.has_errors(), "{:?}", response.errors);
    assert_eq!(response.data, Some(expected_values()));
    assert_eq!(*values.lock().unwrap(), vec![vec![1, 2, 3]]);
}

/// Sibling loads issued in one pass share a single fetch with distinct keys.
#[tokio::test]
async fn test_sibling_loads_share_one_fetch() {
    assert_single_fetch(ExecutorConfig::default()).await;
}

/// Batching also holds when sibling fields are polled within one task.
#[tokio::test]
async fn test_single_fetch_without_parallel_fields() {
    assert_single_fetch(ExecutorConfig::default().with_parallel_fields(false)).await;
}

/// Batching also holds when sibling fields run on several worker threads.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_fetch_multi_thread() {
    for _ in 0..10 {
        assert_single_fetch(ExecutorConfig::default()).await;
    }
}

async fn assert_wide_level_fetches_once(config: ExecutorConfig) {
    let keys: Vec<i64> = (1..=150).collect();
    let values = CallLog::default();
    let labels = CallLog::default();
    let executor = executor_for(schema_with_keys(&keys), config, &values, &labels);
    let op = Operation::query().select(Field::new("items").select(Field::new("value")));

    let response = executor.execute(Request::new(op)).await;

    assert!(!response.has_errors(), "{:?}", response.errors);
    let data = response.data.unwrap();
    assert_eq!(data["items"][149]["value"], json!(1500));
    assert_eq!(*values.lock().unwrap(), vec![keys]);
}

/// More loading fields than the resolver limit still share one fetch.
#[tokio::test]
async fn test_loads_beyond_resolver_limit_share_one_fetch() {
    assert_wide_level_fetches_once(ExecutorConfig::default()).await;
    assert_wide_level_fetches_once(ExecutorConfig::default().with_parallel_fields(false)).await;
    assert_wide_level_fetches_once(ExecutorConfig::default().with_max_concurrent_fields(3)).await;
}

/// Loads that depend on earlier loads batch again in a later round.
#[tokio::test]
async fn test_dependent_loads_batch_per_round() {
    let values = CallLog::default();
    let labels = CallLog::default();
    let executor = executor(ExecutorConfig::default(), &values, &labels);
    let op = Operation::query().select(Field::new("items").select(Field::new("label")));

    let response = executor.execute(Request::new(op)).await;

    assert!(!response.has_errors(), "{:?}", response.errors);
    let data = response.data.unwrap();
    assert_eq!(data["items"][0]["label"], json!("value 10"));
    assert_eq!(data["items"][3]["label"], json!("value 30"));
    assert_eq!(*values.lock().unwrap(), vec![vec![1, 2, 3]]);
    assert_eq!(*labels.lock().unwrap(), vec![vec![10, 20, 30]]);
}

/// A failed fetch is reported to every field waiting on the batch.
#[tokio::test]
async fn test_failed_fetch_reaches_every_waiter() {
    let values = CallLog::default();
    let labels = CallLog::default();
    let executor = executor(ExecutorConfig::default(), &values, &labels);
    let op = Operation::query().select(Field::new("items").select(Field::new("broken")));

    let response = executor.execute(Request::new(op)).await;

    let items = response.data.unwrap()["items"].clone();
    assert_eq!(items.as_array().unwrap().len(), KEYS.len());
    assert!(items
        .as_array()
        .unwrap()
        .iter()
        .all(|item| item["broken"].is_null()));

    assert_eq!(response.errors.len(), KEYS.len());
    for (index, error) in response.errors.iter().enumerate() {
        assert_eq!(error.code(), Some("BATCH_LOAD_FAILED"));
        assert_eq!(error.message(), "batch load failed: storage unavailable");
        assert_eq!(
            error.path().unwrap().print(),
            format!("/items[{index}]/broken")
        );
    }
}

/// Without batching every load fetches on its own.
#[tokio::test]
async fn test_loads_without_batching() {
    let values = CallLog::default();
    let labels = CallLog::default();
    let executor = executor(ExecutorConfig::default().with_batching(false), &values, &labels);
    let op = Operation::query()
        .select(Field::new("items").select(Field::new("key")).select(Field::new("value")));

    let response = executor.execute(Request::new(op)).await;

    assert_eq!(response.data, Some(expected_values()));
    let calls = values.lock().unwrap();
    assert!(calls.len() >= 3);
    assert!(calls.iter().all(|keys| keys.len() == 1));
}

/// A request cancelled before its batches fire never fetches them.
#[tokio::test]
async fn test_cancelled_request_skips_pending_batches() {
    let values = CallLog::default();
    let labels = CallLog::default();
    let executor = executor(ExecutorConfig::default(), &values, &labels);
    let token = CancellationToken::new();
    token.cancel();

    let op = Operation::query().select(Field::new("items").select(Field::new("value")));
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        executor.execute(Request::new(op).with_cancellation(token)),
    )
    .await
    .unwrap();

    assert!(values.lock().unwrap().is_empty());
    assert!(response.has_errors());
    assert!(response
        .errors
        .iter()
        .all(|error| error.code() == Some("CANCELLED")));
}
