//! Bounded work queue: one per request type.
//!
//! Submissions are stored in `pending` (id → envelope) and their ids appended
//! to `order`. A single dispatcher task pops ids in arrival order, takes one
//! of `capacity` semaphore permits and spawns a worker that runs the handler.
//! Removal from `pending` decides who answers a request: the worker that
//! finishes first, or the expiry sweeper once the request is too old.
//!
//! A handler that never returns keeps its permit for good. The sweeper still
//! answers its submitter with a timeout, but the slot is not reclaimed.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use sluice_core::config::QueueSettings;

use crate::depth::QueueDepth;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::sweeper;

/// Type-erased request handler.
pub type Handler<Req, Resp> = Arc<
    dyn Fn(Arc<RequestEnvelope<Req, Resp>>) -> BoxFuture<'static, anyhow::Result<Resp>>
        + Send
        + Sync,
>;

/// Envelopes not yet answered, keyed by id.
pub(crate) type PendingMap<Req, Resp> = DashMap<String, Arc<RequestEnvelope<Req, Resp>>>;

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Max concurrently executing handlers.
    pub capacity: usize,
    /// Age at which an unanswered request is timed out.
    pub expiry: Duration,
    /// Period of the expiry sweep.
    pub sweep_interval: Duration,
    /// Answer faulted requests with an internal error right away.
    pub fail_fast_on_fault: bool,
}

impl QueueOptions {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn fail_fast_on_fault(mut self, enabled: bool) -> Self {
        self.fail_fast_on_fault = enabled;
        self
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.capacity == 0 {
            return Err(QueueError::InvalidOptions("capacity must be at least 1"));
        }
        if self.sweep_interval.is_zero() {
            return Err(QueueError::InvalidOptions("sweep interval must be non-zero"));
        }
        // The sweeper's first tick is scheduled at `now + sweep_interval`.
        if tokio::time::Instant::now().checked_add(self.sweep_interval).is_none() {
            return Err(QueueError::InvalidOptions("sweep interval is out of range"));
        }
        if self.expiry.is_zero() {
            return Err(QueueError::InvalidOptions("expiry must be non-zero"));
        }
        Ok(())
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for QueueOptions {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            capacity: settings.resolved_workers(),
            expiry: settings.expiry(),
            sweep_interval: settings.sweep_interval(),
            fail_fast_on_fault: settings.fail_fast_on_fault,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid queue options: {0}")]
    InvalidOptions(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("request id {0} is already pending")]
    DuplicateId(String),
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// State shared between the queue handle, its dispatcher, workers and sweeper.
pub(crate) struct QueueShared<Req, Resp> {
    pub(crate) name: String,
    pub(crate) pending: PendingMap<Req, Resp>,
    order: Mutex<VecDeque<String>>,
    wake: Notify,
    permits: Arc<Semaphore>,
    capacity: usize,
    handler: Handler<Req, Resp>,
    pub(crate) expiry: Duration,
    fail_fast_on_fault: bool,
}

impl<Req, Resp> QueueShared<Req, Resp> {
    fn order(&self) -> MutexGuard<'_, VecDeque<String>> {
        // Nothing panics while the lock is held; a poisoned lock is still consistent.
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer a request if this caller is the first to claim it.
    fn resolve(
        &self,
        envelope: &RequestEnvelope<Req, Resp>,
        response: ResponseEnvelope<Resp>,
    ) -> bool {
        if self.pending.remove(envelope.id()).is_none() {
            tracing::debug!(
                queue = %self.name,
                id = envelope.id(),
                "request already expired, discarding handler result"
            );
            return false;
        }
        envelope.respond(response)
    }

    fn on_fault(&self, envelope: &RequestEnvelope<Req, Resp>, reason: String) {
        if self.fail_fast_on_fault {
            self.resolve(envelope, ResponseEnvelope::internal_error(reason));
        }
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

/// Bounded, FIFO request queue with its own dispatcher and expiry sweeper.
///
/// Dropping the queue stops both background tasks.
pub struct BoundedWorkQueue<Req, Resp> {
    shared: Arc<QueueShared<Req, Resp>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<Req, Resp> BoundedWorkQueue<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    /// Create the queue and spawn its dispatcher and sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(
        name: impl Into<String>,
        options: QueueOptions,
        handler: F,
    ) -> Result<Self, QueueError>
    where
        F: Fn(Arc<RequestEnvelope<Req, Resp>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let handler: Handler<Req, Resp> = Arc::new(move |envelope| handler(envelope).boxed());
        Self::with_handler(name, options, handler)
    }

    /// Like [`start`](Self::start), with an already type-erased handler.
    pub fn with_handler(
        name: impl Into<String>,
        options: QueueOptions,
        handler: Handler<Req, Resp>,
    ) -> Result<Self, QueueError> {
        options.validate()?;

        let shared = Arc::new(QueueShared {
            name: name.into(),
            pending: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            permits: Arc::new(Semaphore::new(options.capacity)),
            capacity: options.capacity,
            handler,
            expiry: options.expiry,
            fail_fast_on_fault: options.fail_fast_on_fault,
        });

        let dispatcher = tokio::spawn(dispatch_loop(shared.clone()));
        let sweeper = tokio::spawn(sweeper::sweep_loop(shared.clone(), options.sweep_interval));

        tracing::info!(
            queue = %shared.name,
            capacity = options.capacity,
            expiry_ms = options.expiry.as_millis() as u64,
            sweep_ms = options.sweep_interval.as_millis() as u64,
            "work queue started"
        );

        Ok(Self {
            shared,
            tasks: vec![dispatcher, sweeper],
        })
    }

    /// Admit a request without waiting for its response.
    ///
    /// The returned envelope resolves through [`RequestEnvelope::wait`].
    pub fn enqueue(&self, payload: Req) -> Result<Arc<RequestEnvelope<Req, Resp>>, SubmitError> {
        let envelope = Arc::new(RequestEnvelope::new(payload));
        let id = envelope.id().to_string();

        match self.shared.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err(SubmitError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(envelope.clone());
            }
        }

        self.shared.order().push_back(id);
        self.shared.wake.notify_one();

        tracing::trace!(queue = %self.shared.name, id = envelope.id(), "request queued");
        Ok(envelope)
    }

    /// Admit a request and wait for its response.
    ///
    /// Failures are reported through the response status; this never errors.
    pub async fn submit(&self, payload: Req) -> ResponseEnvelope<Resp>
    where
        Resp: Clone,
    {
        match self.enqueue(payload) {
            Ok(envelope) => envelope.wait().await.clone(),
            Err(e) => {
                tracing::error!(queue = %self.shared.name, error = %e, "request rejected");
                ResponseEnvelope::internal_error(e.to_string())
            }
        }
    }
}

impl<Req, Resp> BoundedWorkQueue<Req, Resp> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Requests waiting for dispatch. In-flight work is not counted.
    pub fn queue_length(&self) -> usize {
        self.shared.order().len()
    }

    /// Requests not yet answered, queued or executing.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Worker permits currently held.
    pub fn in_flight(&self) -> usize {
        self.shared.capacity - self.shared.permits.available_permits()
    }
}

impl<Req, Resp> QueueDepth for BoundedWorkQueue<Req, Resp>
where
    Req: Send + Sync,
    Resp: Send + Sync,
{
    fn name(&self) -> &str {
        BoundedWorkQueue::name(self)
    }

    fn queue_length(&self) -> usize {
        BoundedWorkQueue::queue_length(self)
    }
}

impl<Req, Resp> Drop for BoundedWorkQueue<Req, Resp> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Runs until the queue is dropped.
async fn dispatch_loop<Req, Resp>(shared: Arc<QueueShared<Req, Resp>>)
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    loop {
        let next = shared.order().pop_front();
        let Some(id) = next else {
            shared.wake.notified().await;
            continue;
        };

        // Gone from pending = already answered by the sweeper.
        let Some(envelope) = shared.pending.get(&id).map(|e| e.value().clone()) else {
            tracing::trace!(queue = %shared.name, id = %id, "skipping expired request");
            continue;
        };

        let permit = match shared.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break, // semaphore closed
        };

        // It may have expired while we waited for a slot.
        if !shared.pending.contains_key(&id) {
            tracing::trace!(queue = %shared.name, id = %id, "request expired before dispatch");
            continue;
        }

        tokio::spawn(run_worker(shared.clone(), envelope, permit));
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Signals completion, then releases the permit, however the worker ends.
struct CompletionGuard<Req, Resp> {
    envelope: Arc<RequestEnvelope<Req, Resp>>,
    _permit: OwnedSemaphorePermit,
}

impl<Req, Resp> Drop for CompletionGuard<Req, Resp> {
    fn drop(&mut self) {
        self.envelope.signal();
    }
}

async fn run_worker<Req, Resp>(
    shared: Arc<QueueShared<Req, Resp>>,
    envelope: Arc<RequestEnvelope<Req, Resp>>,
    permit: OwnedSemaphorePermit,
) {
    let _guard = CompletionGuard {
        envelope: envelope.clone(),
        _permit: permit,
    };

    let handler = shared.handler.clone();
    let call = {
        let envelope = envelope.clone();
        async move { handler(envelope).await }
    };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(data)) => {
            shared.resolve(&envelope, ResponseEnvelope::success(data));
        }
        Ok(Err(e)) => {
            tracing::warn!(
                queue = %shared.name,
                id = envelope.id(),
                error = %e,
                "request handler failed"
            );
            shared.on_fault(&envelope, e.to_string());
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::warn!(
                queue = %shared.name,
                id = envelope.id(),
                panic = %reason,
                "request handler panicked"
            );
            shared.on_fault(&envelope, reason);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
