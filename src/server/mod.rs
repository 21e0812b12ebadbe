//! Process-level serving.
//!
//! - **`listener`**: the per-worker event loop over a shared listening port
//! - **`pool`**: starts and supervises the worker processes

pub mod listener;
pub mod pool;

pub use listener::{Server, run_worker};
pub use pool::{WorkerCommand, WorkerPool};
