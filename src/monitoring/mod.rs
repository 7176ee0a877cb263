//! Monitoring and observability
//!
//! Health checks and Prometheus metrics, both derived from the
//! provisioner's status report.

mod health;
mod metrics;

pub use health::{check_health, HealthCheck, HealthStatus};
pub use metrics::{export_prometheus, MetricType};
