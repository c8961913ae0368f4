//! DataLoader for graft.
//!
//! Provides batching and caching to prevent N+1 fetches. Keys requested
//! while a batch is still open join that batch; the batch is handed to the
//! request's [`BatchScheduler`], which fetches it once per dispatch round.

use crate::batch::{
    lock, BatchScheduler, ContextToken, NoopBatchScheduler, PendingBatch, PendingBatchKey,
    RegistrationError,
};
use futures::future::{join_all, BoxFuture};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors delivered to data loader callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The batch fetch failed. Every waiter of the batch receives it.
    #[error("batch load failed: {0}")]
    Failed(String),

    /// The batch was abandoned before it was fetched.
    #[error("batch load was cancelled")]
    Cancelled,

    /// No loader of the requested type is registered with the executor.
    #[error("no data loader registered for {0}")]
    NotRegistered(&'static str),

    /// The scheduler refused the batch.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

impl LoadError {
    /// Creates a fetch failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result of one batch fetch.
pub type BatchResult<K, V> = Result<HashMap<K, V>, LoadError>;

/// A batch fetch function over a key type.
pub trait BatchLoader: Send + Sync + 'static {
    /// The key type.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    /// The value type.
    type Value: Clone + Send + Sync + 'static;

    /// Identity used to group batches. Defaults to the type name.
    fn identity(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Fetches the values of `keys`. Keys absent from the map load as `None`.
    fn load(&self, keys: Vec<Self::Key>) -> BoxFuture<'_, BatchResult<Self::Key, Self::Value>>;
}

/// A [`BatchLoader`] backed by a closure.
pub struct FnLoader<K, V, F> {
    identity: String,
    batch_fn: F,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, F, Fut> BatchLoader for FnLoader<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<K, V>> + Send + 'static,
{
    type Key = K;
    type Value = V;

    fn identity(&self) -> &str {
        &self.identity
    }

    fn load(&self, keys: Vec<K>) -> BoxFuture<'_, BatchResult<K, V>> {
        Box::pin((self.batch_fn)(keys))
    }
}

/// Creates a loader from a batch function.
pub fn create_loader<K, V, F, Fut>(identity: impl Into<String>, batch_fn: F) -> FnLoader<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<K, V>> + Send + 'static,
{
    FnLoader {
        identity: identity.into(),
        batch_fn,
        _marker: PhantomData,
    }
}

type Waiter<V> = oneshot::Sender<Result<Option<V>, LoadError>>;

struct BatchState<L: BatchLoader> {
    sealed: bool,
    waiters: IndexMap<L::Key, Vec<Waiter<L::Value>>>,
}

struct Batch<L: BatchLoader> {
    key: PendingBatchKey,
    shared: Arc<Shared<L>>,
    state: Mutex<BatchState<L>>,
}

impl<L: BatchLoader> Batch<L> {
    fn with_waiter(shared: &Arc<Shared<L>>, key: L::Key, waiter: Waiter<L::Value>) -> Self {
        let mut waiters = IndexMap::new();
        waiters.insert(key, vec![waiter]);
        Self {
            key: PendingBatchKey::new(Arc::clone(&shared.identity), shared.owner),
            shared: Arc::clone(shared),
            state: Mutex::new(BatchState {
                sealed: false,
                waiters,
            }),
        }
    }

    // Gives the waiter back if the batch no longer accepts keys.
    fn enqueue(&self, key: L::Key, waiter: Waiter<L::Value>) -> Result<(), Waiter<L::Value>> {
        let mut state = lock(&self.state);
        if state.sealed {
            return Err(waiter);
        }
        state.waiters.entry(key).or_default().push(waiter);
        Ok(())
    }

    fn take_waiters(&self) -> IndexMap<L::Key, Vec<Waiter<L::Value>>> {
        let mut state = lock(&self.state);
        state.sealed = true;
        std::mem::take(&mut state.waiters)
    }

    fn fail(&self, error: &LoadError) {
        for waiter in self.take_waiters().into_values().flatten() {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

impl<L: BatchLoader> PendingBatch for Batch<L> {
    fn key(&self) -> &PendingBatchKey {
        &self.key
    }

    fn seal(&self) {
        lock(&self.state).sealed = true;
    }

    fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let waiters = self.take_waiters();
            if waiters.is_empty() {
                return;
            }
            let keys: Vec<L::Key> = waiters.keys().cloned().collect();
            tracing::trace!(loader = %self.key, keys = keys.len(), "fetching batch");

            match self.shared.loader.load(keys).await {
                Ok(values) => {
                    self.shared.store(&values);
                    for (key, senders) in waiters {
                        let value = values.get(&key);
                        for sender in senders {
                            let _ = sender.send(Ok(value.cloned()));
                        }
                    }
                }
                Err(error) => {
                    tracing::debug!(loader = %self.key, %error, "batch fetch failed");
                    for sender in waiters.into_values().flatten() {
                        let _ = sender.send(Err(error.clone()));
                    }
                }
            }
        })
    }

    fn cancel(&self) {
        self.fail(&LoadError::Cancelled);
    }
}

struct LoaderState<L: BatchLoader> {
    current: Option<Weak<Batch<L>>>,
    cache: FxHashMap<L::Key, L::Value>,
}

struct Shared<L: BatchLoader> {
    loader: Arc<L>,
    identity: Arc<str>,
    owner: ContextToken,
    state: Mutex<LoaderState<L>>,
}

impl<L: BatchLoader> Shared<L> {
    fn store(&self, values: &HashMap<L::Key, L::Value>) {
        let mut state = lock(&self.state);
        for (key, value) in values {
            state.cache.insert(key.clone(), value.clone());
        }
    }

    fn cached(&self, key: &L::Key) -> Option<L::Value> {
        lock(&self.state).cache.get(key).cloned()
    }
}

/// A per-request batching and caching facade over a [`BatchLoader`].
pub struct DataLoader<L: BatchLoader> {
    shared: Arc<Shared<L>>,
    scheduler: Arc<dyn BatchScheduler>,
}

impl<L: BatchLoader> DataLoader<L> {
    /// Creates a loader whose batches are owned by `owner` and dispatched by
    /// `scheduler`.
    pub fn new(loader: Arc<L>, scheduler: Arc<dyn BatchScheduler>, owner: ContextToken) -> Self {
        let identity: Arc<str> = Arc::from(loader.identity());
        Self {
            shared: Arc::new(Shared {
                loader,
                identity,
                owner,
                state: Mutex::new(LoaderState {
                    current: None,
                    cache: FxHashMap::default(),
                }),
            }),
            scheduler,
        }
    }

    /// Creates a loader that fetches inline, without batching.
    pub fn standalone(loader: L) -> Self {
        Self::new(
            Arc::new(loader),
            Arc::new(NoopBatchScheduler),
            ContextToken::next(),
        )
    }

    /// The loader identity.
    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    /// Loads a value by key.
    ///
    /// With a batching scheduler the call suspends until the key's batch has
    /// been dispatched.
    pub async fn load(&self, key: L::Key) -> Result<Option<L::Value>, LoadError> {
        if !self.scheduler.is_batching() {
            return self.load_inline(key).await;
        }

        let (receiver, created) = {
            let mut state = lock(&self.shared.state);
            if let Some(value) = state.cache.get(&key) {
                return Ok(Some(value.clone()));
            }

            let (sender, receiver) = oneshot::channel();
            let rejected = match state.current.as_ref().and_then(Weak::upgrade) {
                Some(batch) => batch.enqueue(key.clone(), sender).err(),
                None => Some(sender),
            };
            match rejected {
                None => (receiver, None),
                Some(sender) => {
                    let batch = Arc::new(Batch::with_waiter(&self.shared, key, sender));
                    state.current = Some(Arc::downgrade(&batch));
                    (receiver, Some(batch))
                }
            }
        };

        if let Some(batch) = created {
            let pending: Arc<dyn PendingBatch> = Arc::clone(&batch) as Arc<dyn PendingBatch>;
            if let Err(error) = self.scheduler.schedule(pending) {
                batch.fail(&LoadError::from(error));
            }
        }

        crate::limit::released(receiver)
            .await
            .unwrap_or(Err(LoadError::Cancelled))
    }

    async fn load_inline(&self, key: L::Key) -> Result<Option<L::Value>, LoadError> {
        if let Some(value) = self.shared.cached(&key) {
            return Ok(Some(value));
        }
        let mut values = self.shared.loader.load(vec![key.clone()]).await?;
        let value = values.remove(&key);
        if let Some(value) = &value {
            lock(&self.shared.state).cache.insert(key, value.clone());
        }
        Ok(value)
    }

    /// Loads multiple values. Missing keys are absent from the map; the
    /// first failure is returned.
    pub async fn load_many(
        &self,
        keys: Vec<L::Key>,
    ) -> Result<HashMap<L::Key, L::Value>, LoadError> {
        let loads = keys.into_iter().map(|key| async move {
            let value = self.load(key.clone()).await;
            (key, value)
        });

        let mut values = HashMap::new();
        for (key, value) in join_all(loads).await {
            if let Some(value) = value? {
                values.insert(key, value);
            }
        }
        Ok(values)
    }

    /// Primes the cache with a value.
    pub fn prime(&self, key: L::Key, value: L::Value) {
        lock(&self.shared.state).cache.insert(key, value);
    }

    /// Clears the cache.
    pub fn clear(&self) {
        lock(&self.shared.state).cache.clear();
    }

    /// Clears a specific key from the cache.
    pub fn clear_key(&self, key: &L::Key) {
        lock(&self.shared.state).cache.remove(key);
    }
}

impl<L: BatchLoader> fmt::Debug for DataLoader<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataLoader")
            .field("identity", &self.shared.identity)
            .field("owner", &self.shared.owner)
            .field("batching", &self.scheduler.is_batching())
            .finish()
    }
}

/// Loader implementations shared by every request of an executor.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl LoaderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loader, replacing one of the same type.
    pub fn register<L: BatchLoader>(&mut self, loader: L) {
        self.loaders.insert(TypeId::of::<L>(), Arc::new(loader));
    }

    /// Gets a loader by type.
    pub fn get<L: BatchLoader>(&self) -> Option<Arc<L>> {
        self.loaders
            .get(&TypeId::of::<L>())
            .and_then(|loader| Arc::clone(loader).downcast::<L>().ok())
    }

    /// Number of registered loaders.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Returns true if no loader is registered.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loader_count", &self.loaders.len())
            .finish()
    }
}

/// The data loaders of one request, created on first use.
pub struct LoaderScope {
    registry: Arc<LoaderRegistry>,
    scheduler: Arc<dyn BatchScheduler>,
    owner: ContextToken,
    instances: Mutex<FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl LoaderScope {
    /// Creates a scope for the request identified by `owner`.
    pub fn new(
        registry: Arc<LoaderRegistry>,
        scheduler: Arc<dyn BatchScheduler>,
        owner: ContextToken,
    ) -> Self {
        Self {
            registry,
            scheduler,
            owner,
            instances: Mutex::new(FxHashMap::default()),
        }
    }

    /// The request's scheduler.
    pub fn scheduler(&self) -> &Arc<dyn BatchScheduler> {
        &self.scheduler
    }

    /// The request context that owns this scope's batches.
    pub fn owner(&self) -> ContextToken {
        self.owner
    }

    /// Returns the request's instance of loader `L`.
    pub fn get<L: BatchLoader>(&self) -> Result<Arc<DataLoader<L>>, LoadError> {
        let mut instances = lock(&self.instances);
        if let Some(existing) = instances.get(&TypeId::of::<L>()) {
            if let Ok(loader) = Arc::clone(existing).downcast::<DataLoader<L>>() {
                return Ok(loader);
            }
        }

        let loader = self
            .registry
            .get::<L>()
            .ok_or(LoadError::NotRegistered(std::any::type_name::<L>()))?;
        let instance = Arc::new(DataLoader::new(
            loader,
            Arc::clone(&self.scheduler),
            self.owner,
        ));
        instances.insert(TypeId::of::<L>(), Arc::clone(&instance) as Arc<dyn Any + Send + Sync>);
        Ok(instance)
    }
}

impl fmt::Debug for LoaderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderScope")
            .field("owner", &self.owner)
            .field("instances", &lock(&self.instances).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchDispatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    fn doubling_loader(calls: Arc<Mutex<Vec<Vec<i32>>>>) -> impl BatchLoader<Key = i32, Value = i32> {
        create_loader("doubler", move |mut keys: Vec<i32>| {
            let calls = Arc::clone(&calls);
            async move {
                keys.sort_unstable();
                lock(&calls).push(keys.clone());
                Ok(keys.into_iter().filter(|k| *k >= 0).map(|k| (k, k * 2)).collect())
            }
        })
    }

    #[tokio::test]
    async fn test_dataloader() {
        let loader = DataLoader::standalone(create_loader("doubler", |keys: Vec<i32>| async move {
            Ok(keys.into_iter().map(|k| (k, k * 2)).collect())
        }));

        let result = loader.load_many(vec![1, 2, 3]).await.unwrap();
        assert_eq!(result.get(&1), Some(&2));
        assert_eq!(result.get(&2), Some(&4));
        assert_eq!(result.get(&3), Some(&6));
    }

    #[tokio::test]
    async fn test_cache_prime_and_clear() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let loader = DataLoader::standalone(doubling_loader(Arc::clone(&calls)));

        loader.prime(10, 99);
        assert_eq!(loader.load(10).await.unwrap(), Some(99));
        assert!(lock(&calls).is_empty());

        assert_eq!(loader.load(4).await.unwrap(), Some(8));
        assert_eq!(loader.load(4).await.unwrap(), Some(8));
        assert_eq!(lock(&calls).len(), 1);

        loader.clear_key(&4);
        assert_eq!(loader.load(4).await.unwrap(), Some(8));
        assert_eq!(lock(&calls).len(), 2);

        loader.clear();
        assert_eq!(loader.load(10).await.unwrap(), Some(20));
        assert_eq!(loader.load(-1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_batched_loads_share_one_fetch() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(BatchDispatcher::new());
        let loader = DataLoader::new(
            Arc::new(doubling_loader(Arc::clone(&calls))),
            dispatcher.clone(),
            ContextToken::next(),
        );

        let values = dispatcher
            .drive(
                async {
                    join_all([3, 1, 3, 2].into_iter().map(|key| loader.load(key))).await
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let values: Vec<_> = values.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![Some(6), Some(2), Some(6), Some(4)]);
        assert_eq!(*lock(&calls), vec![vec![1, 2, 3]]);
        assert_eq!(dispatcher.rounds(), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fetches);
        let dispatcher = Arc::new(BatchDispatcher::new());
        let loader = DataLoader::new(
            Arc::new(create_loader("broken", move |_keys: Vec<u8>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<HashMap<u8, u8>, _>(LoadError::failed("backend down")) }
            })),
            dispatcher.clone(),
            ContextToken::next(),
        );

        let results = dispatcher
            .drive(
                async { join_all([1, 2, 1].into_iter().map(|key| loader.load(key))).await },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result, Err(LoadError::failed("backend down")));
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch() {
        let dispatcher = Arc::new(BatchDispatcher::new());
        let loader = DataLoader::new(
            Arc::new(doubling_loader(Arc::new(Mutex::new(Vec::new())))),
            dispatcher.clone(),
            ContextToken::next(),
        );
        dispatcher.close();
        assert_eq!(loader.load(1).await, Err(LoadError::Cancelled));
    }

    #[test]
    fn test_registry_and_scope() {
        struct Doubler;
        impl BatchLoader for Doubler {
            type Key = i32;
            type Value = i32;

            fn load(&self, keys: Vec<i32>) -> BoxFuture<'_, BatchResult<i32, i32>> {
                Box::pin(async move { Ok(keys.into_iter().map(|k| (k, k * 2)).collect()) })
            }
        }

        let mut registry = LoaderRegistry::new();
        assert!(registry.is_empty());
        registry.register(Doubler);
        assert_eq!(registry.len(), 1);

        let scope = LoaderScope::new(
            Arc::new(registry),
            Arc::new(NoopBatchScheduler),
            ContextToken::next(),
        );
        let first = scope.get::<Doubler>().unwrap();
        let second = scope.get::<Doubler>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.identity().ends_with("Doubler"));

        struct Missing;
        impl BatchLoader for Missing {
            type Key = u8;
            type Value = u8;

            fn load(&self, _keys: Vec<u8>) -> BoxFuture<'_, BatchResult<u8, u8>> {
                Box::pin(async { Ok(HashMap::new()) })
            }
        }
        assert!(matches!(
            scope.get::<Missing>(),
            Err(LoadError::NotRegistered(_))
        ));
    }
}
