//! In-process metrics, rendered by the `/metrics` handler in Prometheus text
//! format. Counters are plain atomics keyed by label sets.

pub mod metrics;

pub use metrics::BridgeMetrics;
