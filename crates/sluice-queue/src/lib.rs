//! sluice-queue: bounded per-type request queues with expiry and
//! process-wide admission control.

pub mod admission;
pub mod depth;
pub mod envelope;
pub mod queue;
pub mod registry;
mod sweeper;

pub use admission::AdmissionController;
pub use depth::QueueDepth;
pub use envelope::{RequestEnvelope, ResponseEnvelope, ResponseStatus, TIMEOUT_MESSAGE};
pub use queue::{BoundedWorkQueue, Handler, QueueError, QueueOptions, SubmitError};
pub use registry::{QueueRegistry, QueueRegistryBuilder, RegistryError};
