//! Tracing setup, tracking events and timing scopes shared by the pipeline.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Checkpoint events and the sinks that record them.
pub mod tracking;

/// Elapsed-time scopes for processing steps.
pub mod timing;

pub use timing::PerfScope;
pub use tracking::{
    MemoryTrackingSink, TrackingEntry, TrackingError, TrackingEvent, TrackingSink, TracingSink,
    best_effort, fields,
};
