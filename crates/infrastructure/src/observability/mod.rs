//! Observability module
//!
//! - Metrics collection via the `metrics` facade, exported to Prometheus
//! - Structured event logging helpers

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::{init_metrics, MetricsCollector};
pub use structured_logger::StructuredLogger;
