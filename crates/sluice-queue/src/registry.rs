//! Queue registry: one queue per request type.
//!
//! Built once at startup through `QueueRegistryBuilder`, then frozen and
//! shared by `Arc`. Queues are keyed on the `TypeId` of their request type;
//! typed lookups downcast the stored handle, depth reads go through the
//! `QueueDepth` trait object and never need the concrete types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::depth::QueueDepth;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::queue::{BoundedWorkQueue, QueueError, QueueOptions};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a queue is already registered for request type {0}")]
    DuplicateRequestType(&'static str),
    #[error("queue {name}: {source}")]
    InvalidQueue {
        name: String,
        #[source]
        source: QueueError,
    },
}

struct RegisteredQueue {
    depth: Arc<dyn QueueDepth>,
    handle: Arc<dyn Any + Send + Sync>,
}

/// Collects queue registrations before the registry is frozen.
#[derive(Default)]
pub struct QueueRegistryBuilder {
    queues: HashMap<TypeId, RegisteredQueue>,
}

impl QueueRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register the queue for requests of type `Req`.
    ///
    /// Registering the same request type twice is a wiring bug and fails.
    /// Must be called from within a Tokio runtime.
    pub fn register<Req, Resp, F, Fut>(
        &mut self,
        name: impl Into<String>,
        options: QueueOptions,
        handler: F,
    ) -> Result<Arc<BoundedWorkQueue<Req, Resp>>, RegistryError>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + 'static,
        F: Fn(Arc<RequestEnvelope<Req, Resp>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let key = TypeId::of::<Req>();
        if self.queues.contains_key(&key) {
            return Err(RegistryError::DuplicateRequestType(std::any::type_name::<Req>()));
        }

        let name = name.into();
        let queue = BoundedWorkQueue::start(name.clone(), options, handler)
            .map_err(|source| RegistryError::InvalidQueue { name, source })?;
        let queue = Arc::new(queue);

        self.queues.insert(
            key,
            RegisteredQueue {
                depth: queue.clone(),
                handle: queue.clone(),
            },
        );
        Ok(queue)
    }

    pub fn build(self) -> QueueRegistry {
        QueueRegistry {
            queues: self.queues,
        }
    }
}

/// Immutable request-type → queue mapping.
pub struct QueueRegistry {
    queues: HashMap<TypeId, RegisteredQueue>,
}

impl QueueRegistry {
    pub fn builder() -> QueueRegistryBuilder {
        QueueRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// The queue registered for `Req`, if its response type is `Resp`.
    pub fn queue<Req, Resp>(&self) -> Option<Arc<BoundedWorkQueue<Req, Resp>>>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + 'static,
    {
        let entry = self.queues.get(&TypeId::of::<Req>())?;
        entry.handle.clone().downcast::<BoundedWorkQueue<Req, Resp>>().ok()
    }

    /// Submit to the queue registered for `Req` and wait for the response.
    ///
    /// An unregistered type is answered with an internal error.
    pub async fn submit<Req, Resp>(&self, payload: Req) -> ResponseEnvelope<Resp>
    where
        Req: Send + Sync + 'static,
        Resp: Clone + Send + Sync + 'static,
    {
        let request_type = std::any::type_name::<Req>();
        let Some(entry) = self.queues.get(&TypeId::of::<Req>()) else {
            tracing::error!(request_type, "no queue registered for request type");
            return ResponseEnvelope::internal_error(format!("no queue registered for {request_type}"));
        };

        match entry.handle.clone().downcast::<BoundedWorkQueue<Req, Resp>>() {
            Ok(queue) => queue.submit(payload).await,
            Err(_) => {
                let response_type = std::any::type_name::<Resp>();
                tracing::error!(
                    queue = entry.depth.name(),
                    request_type,
                    response_type,
                    "response type does not match registered queue"
                );
                ResponseEnvelope::internal_error(format!(
                    "queue {} for {request_type} does not respond with {response_type}",
                    entry.depth.name()
                ))
            }
        }
    }

    /// Every registered queue, for depth aggregation.
    pub fn depths(&self) -> impl Iterator<Item = &dyn QueueDepth> + '_ {
        self.queues.values().map(|q| q.depth.as_ref())
    }

    /// Sum of un-dispatched requests over all queues.
    pub fn total_depth(&self) -> usize {
        self.depths().map(|q| q.queue_length()).sum()
    }

    /// `(name, queue_length)` for every queue, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut rows: Vec<_> = self
            .depths()
            .map(|q| (q.name().to_string(), q.queue_length()))
            .collect();
        rows.sort();
        rows
    }
}
