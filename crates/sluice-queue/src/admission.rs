//! Admission control: is the process overloaded?
//!
//! Intake logic asks before submitting. The answer is a point-in-time sum
//! of every queue's un-dispatched backlog compared against a global limit;
//! nothing is reserved, so concurrent callers can overshoot slightly.

use std::sync::Arc;

use sluice_core::config::AdmissionConfig;

use crate::registry::QueueRegistry;

#[derive(Clone)]
pub struct AdmissionController {
    registry: Arc<QueueRegistry>,
    limit: usize,
}

impl AdmissionController {
    pub fn new(registry: Arc<QueueRegistry>, limit: usize) -> Self {
        Self { registry, limit }
    }

    pub fn from_config(registry: Arc<QueueRegistry>, config: &AdmissionConfig) -> Self {
        Self::new(registry, config.limit)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Un-dispatched requests across every registered queue.
    pub fn total_depth(&self) -> usize {
        self.registry.total_depth()
    }

    /// True when the total backlog has reached the limit.
    pub fn is_overloaded(&self) -> bool {
        let depth = self.total_depth();
        let overloaded = depth >= self.limit;
        if overloaded {
            tracing::debug!(depth, limit = self.limit, "admission limit reached");
        }
        overloaded
    }
}
