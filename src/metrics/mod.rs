//! Metrics module for Prometheus-based monitoring.
//!
//! Covers the generation pipeline (requests, stage latency, debugger
//! attempts, backend and sandbox calls) and the feedback flywheel (events,
//! suggestions, regenerations, mentor hints).
//!
//! # Example
//!
//! ```ignore
//! use capsule_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_generation("published", "python", 31.0);
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{InFlightGuard, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics, REGISTRY};
