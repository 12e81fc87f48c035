//! Shared plumbing for the RKE2 controllers
//!
//! - [`backoff`]: Fibonacci retry backoff and a per-object ledger of it
//! - [`metrics`]: Prometheus reconcile counters and durations
//! - [`probes`]: `/healthz`, `/readyz` and `/metrics` HTTP endpoint

pub mod backoff;
pub mod metrics;
pub mod probes;

pub use backoff::{BackoffLedger, FibonacciBackoff};
pub use metrics::ReconcileMetrics;
pub use probes::{ProbeState, serve_probes};
