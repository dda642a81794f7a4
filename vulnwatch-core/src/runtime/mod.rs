//! Drives the reconcilers: per-key work queues, backoff, worker pools and the
//! observation entry points.

pub mod cache;
pub mod operator;
pub mod queue;
pub mod retry;

pub use cache::WorkloadCache;
pub use operator::{
    JobObservation, ObservationKind, Operator, WorkloadObservation, validate_config,
};
pub use queue::WorkQueue;
pub use retry::RetryPolicy;
