//! Snapshot production and delivery

pub mod live;
pub mod sink;
pub mod snapshot;
pub mod tracker;

pub use live::{Coach, LiveSession};
pub use sink::{MetricsSink, OverlaySink, SessionAccumulator, SessionSummary};
pub use snapshot::SessionMetrics;
pub use tracker::{ModelState, TickError, TrackingHandle, TrackingLoop, TrackingStats};
