//! # pagewright-worker
//!
//! The ephemeral worker runtime. Invoked once per job with its entire
//! context in the environment, it fetches the base artifact, applies the
//! build instructions via the code-generation executor, packs and uploads
//! the result, and reports back to the manager.
//!
//! The worker never renews its site lock (the lease is sized for a full
//! run) and never retries: any failure becomes a `Failed` report.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod callback;
pub mod executor;
pub mod run;
pub mod server;

pub use callback::ManagerClient;
pub use executor::Executor;
pub use run::JobRunner;
pub use server::{StatusBoard, WorkerState, create_router};
