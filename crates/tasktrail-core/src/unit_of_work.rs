//! Per-request unit of work.
//!
//! A `UnitOfWork` coordinates writes across backing stores that cannot share
//! one transaction. Stores register a commit action (e.g. `COMMIT`) and a
//! compensation (e.g. `ROLLBACK`) the first time they join; the request
//! handler then settles the context exactly once. Commit runs every commit
//! action in order and dispatches the queued events. Rollback runs every
//! compensation in order, each retried with backoff.
//!
//! A deadline timer rolls the context back if the request outlives it, and
//! `run` drops the request's work at that moment.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, error, info_span, warn};

use crate::error::DomainError;
use crate::event::{EventDispatcher, PendingEvent};
use crate::retry::RetryPolicy;
use crate::trace::{TraceCarrier, TraceInfo};

/// Future returned by an [`Action`].
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send>>;

/// A re-invocable async step run on commit or rollback.
pub type Action = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

/// Wraps an async closure as an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Retries `failed`, whose first attempt already happened, then delivers
/// `queued` in order. Every event gets at most `max_times + 1` attempts.
async fn redispatch(
    dispatcher: Arc<dyn EventDispatcher>,
    retry: RetryPolicy,
    failed: PendingEvent,
    queued: Vec<PendingEvent>,
) {
    let mut last_error = None;
    for delay in retry.backoff().build() {
        tokio::time::sleep(delay).await;
        match dispatcher.dispatch(&failed).await {
            Ok(()) => {
                last_error = None;
                break;
            }
            Err(e) => {
                warn!(event_id = failed.id, error = %e, ?delay, "retrying event dispatch");
                last_error = Some(e);
            }
        }
    }
    if let Some(e) = last_error {
        dispatch_failed(&failed, &e);
    }

    for event in &queued {
        let dispatcher = dispatcher.as_ref();
        let result = (|| async move { dispatcher.dispatch(event).await })
            .retry(retry.backoff())
            .notify(|e: &DomainError, delay: Duration| {
                warn!(event_id = event.id, error = %e, ?delay, "retrying event dispatch");
            })
            .await;
        if let Err(e) = result {
            dispatch_failed(event, &e);
        }
    }
}

fn dispatch_failed(event: &PendingEvent, error: &DomainError) {
    error!(
        event_id = event.id,
        stream = %event.stream,
        stream_id = %event.stream_id,
        version = event.version,
        %error,
        "event dispatch failed after retries"
    );
}

/// Backing stores that can hold a per-context transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// The Postgres event store and read models.
    Relational,
    /// The Redis permission cache.
    Cache,
}

/// How a context was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Neither committed nor rolled back yet.
    Pending,
    /// Every commit action succeeded.
    Committed,
    /// Compensations were run.
    RolledBack,
}

/// Why a context stopped accepting work before settling normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DoneReason {
    /// `cancel` was called.
    #[error("context cancelled")]
    Cancelled,
    /// The deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Default)]
struct Ledger {
    compensations: Vec<Action>,
    commit_actions: Vec<Action>,
    events: Vec<PendingEvent>,
}

type Handle = Arc<dyn Any + Send + Sync>;

struct Inner {
    ledger: Mutex<Ledger>,
    handles: tokio::sync::Mutex<HashMap<StoreKind, Handle>>,
    settlement: tokio::sync::Mutex<Settlement>,
    done: watch::Sender<Option<DoneReason>>,
    deadline: Mutex<Option<Instant>>,
    timer: Mutex<Option<AbortHandle>>,
    trace: TraceInfo,
    retry: RetryPolicy,
    dispatcher: Arc<dyn EventDispatcher>,
    span: Span,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Execution context for one inbound request. Cloning shares the context.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<Inner>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("trace", &self.inner.trace)
            .field("done", &*self.inner.done.borrow())
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// Creates a context with no deadline.
    #[must_use]
    pub fn new(trace: TraceInfo, retry: RetryPolicy, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        let span = info_span!(
            "unit_of_work",
            trace_id = %trace.trace_id,
            parent_id = %trace.parent_id,
            request_id = %trace.request_id,
        );
        let (done, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                ledger: Mutex::new(Ledger::default()),
                handles: tokio::sync::Mutex::new(HashMap::new()),
                settlement: tokio::sync::Mutex::new(Settlement::Pending),
                done,
                deadline: Mutex::new(None),
                timer: Mutex::new(None),
                trace,
                retry,
                dispatcher,
                span,
            }),
        }
    }

    /// Appends compensations, run in registration order on rollback.
    pub fn register_compensatory_action(&self, actions: impl IntoIterator<Item = Action>) {
        lock(&self.inner.ledger).compensations.extend(actions);
    }

    /// Appends commit actions, run in registration order on commit.
    pub fn register_commit_action(&self, actions: impl IntoIterator<Item = Action>) {
        lock(&self.inner.ledger).commit_actions.extend(actions);
    }

    /// Queues an event for dispatch once the context commits.
    pub fn register_event(&self, event: PendingEvent) {
        lock(&self.inner.ledger).events.push(event);
    }

    /// Returns the handle for `kind`, running `constructor` only for the first
    /// caller. The flag is `true` when this call created the handle.
    ///
    /// # Errors
    ///
    /// Returns `ContextMisuse` if the context is settled or done, or if the
    /// cached handle is not a `T`. Constructor errors are returned unchanged
    /// and nothing is cached.
    pub async fn get_transaction_object<T, F, Fut>(
        &self,
        kind: StoreKind,
        constructor: F,
    ) -> Result<(Arc<T>, bool), DomainError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, DomainError>> + Send,
    {
        let mut handles = self.inner.handles.lock().await;
        self.ensure_open(kind).await?;

        if let Some(existing) = handles.get(&kind) {
            let handle = Arc::clone(existing).downcast::<T>().map_err(|_| {
                self.misuse(format!("{kind:?} handle is not a {}", type_name::<T>()))
            })?;
            return Ok((handle, false));
        }

        let handle = Arc::new(constructor().await?);
        handles.insert(kind, Arc::clone(&handle) as Handle);
        debug!(parent: &self.inner.span, ?kind, "transaction handle created");
        Ok((handle, true))
    }

    /// Runs every commit action, then marks the context committed and
    /// dispatches its events. Dispatch failures never fail the commit.
    ///
    /// # Errors
    ///
    /// Returns `ContextMisuse` if the context is already settled, or the first
    /// commit action error. After a commit action error the context is still
    /// pending and the caller should roll back.
    pub async fn commit(&self) -> Result<(), DomainError> {
        self.commit_inner().instrument(self.span()).await
    }

    async fn commit_inner(&self) -> Result<(), DomainError> {
        let mut settlement = self.inner.settlement.lock().await;
        if *settlement != Settlement::Pending {
            return Err(self.misuse(format!("commit on a context already {settlement:?}")));
        }

        let actions = lock(&self.inner.ledger).commit_actions.clone();
        for (index, commit_action) in actions.iter().enumerate() {
            if let Err(e) = commit_action().await {
                warn!(index, error = %e, "commit action failed");
                return Err(e);
            }
        }
        *settlement = Settlement::Committed;
        drop(settlement);

        let events = std::mem::take(&mut lock(&self.inner.ledger).events);
        debug!(events = events.len(), "unit of work committed");
        self.dispatch(events).await;
        Ok(())
    }

    /// Dispatches each event once, in order. At the first failure that event
    /// and every later one move to a background task that retries them with
    /// the context's policy, so the caller never waits out the backoff.
    async fn dispatch(&self, events: Vec<PendingEvent>) {
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            if let Err(e) = dispatcher.dispatch(&event).await {
                warn!(
                    event_id = event.id,
                    error = %e,
                    "event dispatch failed, retrying in background"
                );
                let queued: Vec<PendingEvent> = events.collect();
                tokio::spawn(
                    redispatch(dispatcher, self.inner.retry, event, queued)
                        .instrument(self.span()),
                );
                return;
            }
        }
    }

    /// Marks the context rolled back and runs every compensation. A no-op if
    /// the context is already settled.
    pub async fn rollback(&self) {
        self.rollback_inner(None).instrument(self.span()).await;
    }

    /// With a `reason`, the context is marked done before the compensations
    /// run, so work raced against `done` releases its store handles first.
    async fn rollback_inner(&self, reason: Option<DoneReason>) {
        let mut settlement = self.inner.settlement.lock().await;
        if let Some(reason) = reason {
            self.mark_done(reason);
        }
        if *settlement != Settlement::Pending {
            debug!(settlement = ?*settlement, "rollback on settled context ignored");
            return;
        }
        *settlement = Settlement::RolledBack;

        let compensations = {
            let mut ledger = lock(&self.inner.ledger);
            ledger.events.clear();
            ledger.compensations.clone()
        };
        for (index, compensation) in compensations.iter().enumerate() {
            let result = (|| compensation())
                .retry(self.inner.retry.backoff())
                .notify(|e: &DomainError, delay: Duration| {
                    warn!(index, error = %e, ?delay, "retrying compensation");
                })
                .await;
            if let Err(e) = result {
                error!(index, error = %e, "compensation failed after retries");
            }
        }
        debug!(compensations = compensations.len(), "unit of work rolled back");
    }

    /// Commits on `Ok` and rolls back on `Err`, returning the original result
    /// or the commit error.
    ///
    /// # Errors
    ///
    /// Returns the error in `result`, or the commit error.
    pub async fn settle<T>(&self, result: Result<T, DomainError>) -> Result<T, DomainError> {
        match result {
            Ok(value) => match self.commit().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    self.rollback().await;
                    Err(e)
                }
            },
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }

    /// Runs `work` until it finishes or the context is done, then settles
    /// the context with its outcome. Work still running when the context is
    /// done is dropped along with any store handles it holds.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the context is done first, otherwise the
    /// error of `work` or of the commit.
    pub async fn run<T, F>(&self, work: F) -> Result<T, DomainError>
    where
        F: Future<Output = Result<T, DomainError>>,
    {
        let result = tokio::select! {
            biased;
            reason = self.done() => Err(DomainError::Interrupted(reason.to_string())),
            result = work => result,
        };
        self.settle(result).await
    }

    /// Arms (or re-arms) the deadline. On expiry the context is rolled back
    /// and marked done with `DeadlineExceeded`.
    pub fn set_timeout(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        *lock(&self.inner.deadline) = Some(deadline);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                UnitOfWork { inner }
                    .finish(DoneReason::DeadlineExceeded)
                    .await;
            }
        });

        if let Some(previous) = lock(&self.inner.timer).replace(timer.abort_handle()) {
            previous.abort();
        }
    }

    /// Rolls the context back and marks it done with `Cancelled`.
    pub async fn cancel(&self) {
        self.finish(DoneReason::Cancelled).await;
    }

    async fn finish(&self, reason: DoneReason) {
        self.rollback_inner(Some(reason))
            .instrument(self.span())
            .await;
    }

    fn mark_done(&self, reason: DoneReason) {
        let changed = self.inner.done.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if changed {
            warn!(parent: &self.inner.span, %reason, "unit of work done");
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DoneReason {
        let mut rx = self.inner.done.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return DoneReason::Cancelled;
            }
        }
    }

    /// Why the context is done, or `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<DoneReason> {
        *self.inner.done.borrow()
    }

    /// The armed deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        *lock(&self.inner.deadline)
    }

    /// Current settlement state.
    pub async fn settlement(&self) -> Settlement {
        *self.inner.settlement.lock().await
    }

    /// The trace identifiers of the request.
    #[must_use]
    pub fn trace_info(&self) -> &TraceInfo {
        &self.inner.trace
    }

    /// Span carrying the request's trace identifiers. Store operations run
    /// inside it.
    #[must_use]
    pub fn span(&self) -> Span {
        self.inner.span.clone()
    }

    async fn ensure_open(&self, kind: StoreKind) -> Result<(), DomainError> {
        if let Some(reason) = self.err() {
            return Err(self.misuse(format!("{kind:?} handle requested on a done context: {reason}")));
        }
        let settlement = *self.inner.settlement.lock().await;
        if settlement != Settlement::Pending {
            return Err(self.misuse(format!(
                "{kind:?} handle requested on a context already {settlement:?}"
            )));
        }
        Ok(())
    }

    fn misuse(&self, message: String) -> DomainError {
        error!(parent: &self.inner.span, %message, "unit of work misuse");
        DomainError::ContextMisuse(message)
    }
}

impl TraceCarrier for UnitOfWork {
    fn trace_info(&self) -> Option<&TraceInfo> {
        Some(&self.inner.trace)
    }
}

/// Builds one [`UnitOfWork`] per request with shared policy.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    retry: RetryPolicy,
    dispatcher: Arc<dyn EventDispatcher>,
    timeout: Duration,
}

impl fmt::Debug for UnitOfWorkFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkFactory")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl UnitOfWorkFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(retry: RetryPolicy, dispatcher: Arc<dyn EventDispatcher>, timeout: Duration) -> Self {
        Self {
            retry,
            dispatcher,
            timeout,
        }
    }

    /// Creates a context for one request and arms its deadline. Must be
    /// called from within a tokio runtime.
    #[must_use]
    pub fn create(&self, trace: TraceInfo) -> UnitOfWork {
        let uow = UnitOfWork::new(trace, self.retry, Arc::clone(&self.dispatcher));
        uow.set_timeout(self.timeout);
        uow
    }
}
