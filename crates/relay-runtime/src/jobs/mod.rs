//! C6: the job-execution runtime (§4.6) — subscription lifecycle,
//! bounded-concurrency dispatch, and outcome reporting for every registered
//! handler.
//!
//! Grounded on the teacher's `jobs/worker.rs` concurrency loop (semaphore-
//! gated spawn per unit of work claimed from a queue, `tokio::select!`
//! against a shutdown channel) generalized from a polling database queue to a
//! gRPC streaming subscription per task-type, and on `cluster/shutdown.rs`'s
//! broadcast-based shutdown signal.

mod dispatch;
mod supervisor;

pub use supervisor::{run_job_runtime, JobRuntimeConfig};
