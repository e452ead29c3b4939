//! # pagewright-manager
//!
//! The build coordination manager. Owns the job state machine and
//! orchestrates one mutation end to end:
//!
//! ```text
//! intake → create job → acquire site lock → enqueue → spawn worker
//!        → worker callback → update record → release lock
//! ```
//!
//! Guarantees spanning the services:
//!
//! - at most one job per site in `{Pending, Running}` (the lock),
//! - strictly increasing fencing tokens per site (the lock's counter),
//! - terminal records never transition again (late callbacks conflict),
//! - every terminal transition attempts a lock release.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod queue;
pub mod server;
pub mod service;
pub mod spawner;
pub mod sweeper;

pub use config::Config;
pub use queue::{JobQueue, MemoryJobQueue};
pub use server::{AppState, create_router};
pub use service::JobService;
pub use spawner::{CommandSpawner, NoopSpawner, Spawner};
pub use sweeper::TimeoutSweeper;
