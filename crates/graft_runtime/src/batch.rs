//! Per-request batch dispatch.
//!
//! Data loaders queue keys into pending batches and hand them to a
//! [`BatchScheduler`]. The [`BatchDispatcher`] holds them back until every
//! registered execution unit of the request has either finished or parked,
//! then fires one dispatch round containing all pending batches. A batch
//! scheduled while a round is in flight joins the next round.
//!
//! Execution units are futures wrapped in [`ExecutionUnit`]: the wrapper
//! reports the unit as running while it is polled or after it was woken,
//! and as parked when it returns `Pending`.

use futures::future::{join_all, BoxFuture};
use rustc_hash::{FxHashMap, FxHashSet};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Wake, Waker};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifies an execution unit or a request context.
///
/// The default value is the null token, which schedulers reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContextToken(u64);

impl ContextToken {
    /// The null token.
    pub const NULL: Self = Self(0);

    /// Allocates a fresh, process-unique token.
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the null token.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Identifies a deferred fetch group: one loader within one request context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingBatchKey {
    loader: Arc<str>,
    context: ContextToken,
}

impl PendingBatchKey {
    /// Creates a key.
    pub fn new(loader: impl Into<Arc<str>>, context: ContextToken) -> Self {
        Self {
            loader: loader.into(),
            context,
        }
    }

    /// The loader identity.
    pub fn loader(&self) -> &str {
        &self.loader
    }

    /// The owning context.
    pub fn context(&self) -> ContextToken {
        self.context
    }
}

impl fmt::Display for PendingBatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.loader, self.context)
    }
}

/// Scheduler protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The null token was passed.
    #[error("the null context token cannot be registered")]
    NullToken,

    /// The token is already registered.
    #[error("context {0} is already registered")]
    AlreadyRegistered(ContextToken),

    /// The token was never registered.
    #[error("context {0} is not registered")]
    NotRegistered(ContextToken),

    /// A batch for the same loader and context is already pending.
    #[error("a batch for {0} is already pending")]
    DuplicateBatch(PendingBatchKey),
}

/// A batch of queued keys waiting for a dispatch round.
pub trait PendingBatch: Send + Sync {
    /// The key this batch is registered under.
    fn key(&self) -> &PendingBatchKey;

    /// Closes the batch to new keys. Called when a round takes it.
    fn seal(&self);

    /// Fetches the queued keys and resumes every waiter.
    fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// Abandons the batch, failing every waiter with a cancellation error.
    fn cancel(&self);
}

/// The per-request scheduling surface used by executors and data loaders.
pub trait BatchScheduler: Send + Sync {
    /// Records that an execution unit exists and is running.
    fn register(&self, token: ContextToken) -> Result<(), RegistrationError>;

    /// Removes a registration.
    fn unregister(&self, token: ContextToken) -> Result<(), RegistrationError>;

    /// Marks a registered unit as parked. Unknown tokens are ignored.
    fn park(&self, token: ContextToken);

    /// Marks a registered unit as running. Unknown tokens are ignored.
    fn unpark(&self, token: ContextToken);

    /// Number of times the unit was marked running. Unknown tokens report
    /// zero.
    fn wake_count(&self, _token: ContextToken) -> u64 {
        0
    }

    /// Parks the unit only if it was not marked running since its wake
    /// count was `observed`.
    fn park_unless_woken(&self, token: ContextToken, _observed: u64) {
        self.park(token);
    }

    /// Pauses automatic dispatch.
    fn suspend(&self);

    /// Resumes automatic dispatch.
    fn resume(&self);

    /// Queues a batch for the next round.
    fn schedule(&self, batch: Arc<dyn PendingBatch>) -> Result<(), RegistrationError>;

    /// Returns true if loads are deferred into rounds.
    fn is_batching(&self) -> bool;

    /// The runtime that execution units may be spawned on.
    fn runtime_handle(&self) -> Option<Handle> {
        Handle::try_current().ok()
    }
}

/// Scheduler for requests that execute without batching.
///
/// Every operation is a no-op. Data loaders bound to it fetch inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBatchScheduler;

impl BatchScheduler for NoopBatchScheduler {
    fn register(&self, _token: ContextToken) -> Result<(), RegistrationError> {
        Ok(())
    }

    fn unregister(&self, _token: ContextToken) -> Result<(), RegistrationError> {
        Ok(())
    }

    fn park(&self, _token: ContextToken) {}

    fn unpark(&self, _token: ContextToken) {}

    fn suspend(&self) {}

    fn resume(&self) {}

    fn schedule(&self, batch: Arc<dyn PendingBatch>) -> Result<(), RegistrationError> {
        batch.seal();
        match self.runtime_handle() {
            Some(handle) => {
                handle.spawn(batch.dispatch());
            }
            None => batch.cancel(),
        }
        Ok(())
    }

    fn is_batching(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Running,
    Parked,
}

struct UnitEntry {
    state: UnitState,
    wakes: u64,
}

#[derive(Default)]
struct DispatchTable {
    units: FxHashMap<ContextToken, UnitEntry>,
    pending: Vec<Arc<dyn PendingBatch>>,
    keys: FxHashSet<PendingBatchKey>,
    suspended: bool,
    closed: bool,
}

impl DispatchTable {
    fn is_quiescent(&self) -> bool {
        self.units.values().all(|unit| unit.state == UnitState::Parked)
    }
}

/// The batching scheduler of one request.
pub struct BatchDispatcher {
    table: Mutex<DispatchTable>,
    signal: Notify,
    rounds: AtomicU64,
}

impl Default for BatchDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table();
        f.debug_struct("BatchDispatcher")
            .field("units", &table.units.len())
            .field("pending", &table.pending.len())
            .field("suspended", &table.suspended)
            .field("rounds", &self.rounds())
            .finish()
    }
}

impl BatchDispatcher {
    /// Creates a dispatcher with no units and no pending batches.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(DispatchTable::default()),
            signal: Notify::new(),
            rounds: AtomicU64::new(0),
        }
    }

    fn table(&self) -> MutexGuard<'_, DispatchTable> {
        lock(&self.table)
    }

    /// Number of dispatch rounds fired so far.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    /// Number of batches waiting for a round.
    pub fn pending_count(&self) -> usize {
        self.table().pending.len()
    }

    /// Number of registered execution units.
    pub fn unit_count(&self) -> usize {
        self.table().units.len()
    }

    fn take_pending(table: &mut DispatchTable) -> Vec<Arc<dyn PendingBatch>> {
        table.keys.clear();
        let batches = std::mem::take(&mut table.pending);
        for batch in &batches {
            batch.seal();
        }
        batches
    }

    // A round fires only when nothing registered can still add keys.
    fn take_round(&self) -> Option<Vec<Arc<dyn PendingBatch>>> {
        let mut table = self.table();
        if table.suspended || table.pending.is_empty() || !table.is_quiescent() {
            return None;
        }
        Some(Self::take_pending(&mut table))
    }

    async fn dispatch_round(&self, batches: Vec<Arc<dyn PendingBatch>>) {
        let round = self.rounds.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(round, batches = batches.len(), "dispatching batch round");
        join_all(batches.into_iter().map(|batch| batch.dispatch())).await;
    }

    /// Dispatches every pending batch now, regardless of unit states or
    /// suspension. Returns the number of batches dispatched.
    pub async fn flush(&self) -> usize {
        let batches = Self::take_pending(&mut self.table());
        let count = batches.len();
        if count > 0 {
            self.dispatch_round(batches).await;
        }
        count
    }

    /// Abandons all pending batches. Their waiters receive a cancellation
    /// error. Returns the number of abandoned batches.
    pub fn cancel_pending(&self) -> usize {
        let batches = Self::take_pending(&mut self.table());
        for batch in &batches {
            batch.cancel();
        }
        batches.len()
    }

    /// Cancels pending batches and every batch scheduled afterwards.
    pub fn close(&self) {
        self.table().closed = true;
        let abandoned = self.cancel_pending();
        if abandoned > 0 {
            tracing::debug!(abandoned, "closed dispatcher with pending batches");
        }
    }

    /// Fires rounds forever. Each wakeup re-checks the dispatch condition.
    async fn run_rounds(&self) -> Infallible {
        loop {
            match self.take_round() {
                Some(batches) => self.dispatch_round(batches).await,
                None => self.signal.notified().await,
            }
        }
    }

    /// Runs `future` as the root execution unit of the request while firing
    /// dispatch rounds alongside it.
    ///
    /// When `cancellation` fires, pending and later batches are abandoned;
    /// the root is still driven to completion so it can observe the
    /// cancellation cooperatively.
    pub async fn drive<F>(
        self: &Arc<Self>,
        future: F,
        cancellation: &CancellationToken,
    ) -> Result<F::Output, RegistrationError>
    where
        F: Future,
    {
        let scheduler: Arc<dyn BatchScheduler> = Arc::clone(self) as Arc<dyn BatchScheduler>;
        let mut unit = ExecutionUnit::new(scheduler, future)?;
        let rounds = self.run_rounds();
        tokio::pin!(rounds);
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                output = &mut unit => return Ok(output),
                () = cancellation.cancelled(), if !cancelled => {
                    cancelled = true;
                    self.close();
                }
                never = &mut rounds => match never {},
            }
        }
    }
}

impl BatchScheduler for BatchDispatcher {
    fn register(&self, token: ContextToken) -> Result<(), RegistrationError> {
        if token.is_null() {
            return Err(RegistrationError::NullToken);
        }
        let mut table = self.table();
        if table.units.contains_key(&token) {
            return Err(RegistrationError::AlreadyRegistered(token));
        }
        table.units.insert(
            token,
            UnitEntry {
                state: UnitState::Running,
                wakes: 0,
            },
        );
        Ok(())
    }

    fn unregister(&self, token: ContextToken) -> Result<(), RegistrationError> {
        if token.is_null() {
            return Err(RegistrationError::NullToken);
        }
        let removed = self.table().units.remove(&token);
        match removed {
            Some(_) => {
                self.signal.notify_one();
                Ok(())
            }
            None => Err(RegistrationError::NotRegistered(token)),
        }
    }

    fn park(&self, token: ContextToken) {
        let parked = match self.table().units.get_mut(&token) {
            Some(unit) => {
                unit.state = UnitState::Parked;
                true
            }
            None => false,
        };
        if parked {
            self.signal.notify_one();
        }
    }

    fn unpark(&self, token: ContextToken) {
        if let Some(unit) = self.table().units.get_mut(&token) {
            unit.state = UnitState::Running;
            unit.wakes += 1;
        }
    }

    fn wake_count(&self, token: ContextToken) -> u64 {
        self.table().units.get(&token).map_or(0, |unit| unit.wakes)
    }

    fn park_unless_woken(&self, token: ContextToken, observed: u64) {
        let parked = match self.table().units.get_mut(&token) {
            Some(unit) if unit.wakes == observed => {
                unit.state = UnitState::Parked;
                true
            }
            _ => false,
        };
        if parked {
            self.signal.notify_one();
        }
    }

    fn suspend(&self) {
        self.table().suspended = true;
    }

    fn resume(&self) {
        self.table().suspended = false;
        self.signal.notify_one();
    }

    fn schedule(&self, batch: Arc<dyn PendingBatch>) -> Result<(), RegistrationError> {
        let mut table = self.table();
        if table.closed {
            drop(table);
            batch.cancel();
            return Ok(());
        }
        if !table.keys.insert(batch.key().clone()) {
            return Err(RegistrationError::DuplicateBatch(batch.key().clone()));
        }
        table.pending.push(batch);
        drop(table);
        self.signal.notify_one();
        Ok(())
    }

    fn is_batching(&self) -> bool {
        true
    }
}

struct UnitWaker {
    scheduler: Arc<dyn BatchScheduler>,
    token: ContextToken,
    inner: Waker,
}

impl Wake for UnitWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.scheduler.unpark(self.token);
        self.inner.wake_by_ref();
    }
}

/// A future registered with a scheduler as one execution unit.
///
/// The unit unregisters itself when the future completes or when the unit
/// is dropped early.
pub struct ExecutionUnit<F> {
    future: Pin<Box<F>>,
    scheduler: Arc<dyn BatchScheduler>,
    token: ContextToken,
    finished: bool,
}

impl<F: Future> ExecutionUnit<F> {
    /// Registers a fresh unit for `future`.
    pub fn new(scheduler: Arc<dyn BatchScheduler>, future: F) -> Result<Self, RegistrationError> {
        let token = ContextToken::next();
        scheduler.register(token)?;
        Ok(Self {
            future: Box::pin(future),
            scheduler,
            token,
            finished: false,
        })
    }

    /// The unit's token.
    pub fn token(&self) -> ContextToken {
        self.token
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(error) = self.scheduler.unregister(self.token) {
            tracing::warn!(%error, "execution unit failed to unregister");
        }
    }
}

impl<F: Future> Future for ExecutionUnit<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        this.scheduler.unpark(this.token);
        let observed = this.scheduler.wake_count(this.token);

        let waker = Waker::from(Arc::new(UnitWaker {
            scheduler: Arc::clone(&this.scheduler),
            token: this.token,
            inner: cx.waker().clone(),
        }));
        let mut unit_cx = Context::from_waker(&waker);

        match this.future.as_mut().poll(&mut unit_cx) {
            Poll::Ready(output) => {
                this.finish();
                Poll::Ready(output)
            }
            Poll::Pending => {
                // A wake during the poll keeps the unit running.
                this.scheduler.park_unless_woken(this.token, observed);
                Poll::Pending
            }
        }
    }
}

impl<F> Drop for ExecutionUnit<F> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Err(error) = self.scheduler.unregister(self.token) {
                tracing::warn!(%error, "dropped execution unit failed to unregister");
            }
        }
    }
}
