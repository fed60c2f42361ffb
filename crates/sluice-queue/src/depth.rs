//! Depth reporting trait shared by every queue.
//!
//! The admission controller only needs to know how much work is waiting in
//! each queue, not what kind of work it is. Every `BoundedWorkQueue`
//! implements this regardless of its request and response types.

/// A queue whose un-dispatched backlog can be measured.
pub trait QueueDepth: Send + Sync {
    /// Human-readable queue name, used in logs.
    fn name(&self) -> &str;

    /// Requests waiting for a worker. In-flight work is not counted.
    fn queue_length(&self) -> usize;
}
