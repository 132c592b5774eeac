//! Worker system — the polling loop and its liveness bracket.
//!
//! Core components:
//! - `liveness` — per-identity pid markers (one running worker per identity)
//! - `worker` — the long-running control loop: drain, poll, execute, report

pub mod liveness;
pub mod worker;

pub use liveness::LivenessRegistry;
pub use worker::{POLL_ENDPOINT, RESULT_ENDPOINT, Worker, WorkerState};
