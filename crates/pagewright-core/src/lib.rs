//! # pagewright-core
//!
//! Core abstractions for the PageWright build coordination platform.
//!
//! This crate provides the foundational types and traits used across all
//! PageWright services:
//!
//! - **Identifiers**: Strongly-typed IDs for sites, jobs, builds, and workers
//! - **Job Model**: The job record and its state machine
//! - **Lock Service**: Per-site mutual exclusion with TTL and fencing tokens
//! - **Error Types**: Shared error taxonomy and result type
//!
//! ## Crate Boundary
//!
//! `pagewright-core` is the only crate allowed to define shared primitives.
//! Cross-service contracts (the job record, the worker report, the lock
//! semantics) live here so the manager, worker, and serving runner agree on
//! them by construction.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod api;
pub mod error;
pub mod id;
pub mod job;
pub mod lock;
pub mod observability;

pub use api::{ApiError, ApiResult, shutdown_signal};
pub use error::{Error, Result};
pub use id::{BuildId, JobId, SiteId, WorkerId};
pub use job::{Job, JobRequest, JobStatus, StatusUpdate, WorkerReport};
pub use lock::{LockBackend, LockGrant, MemoryLockBackend};
pub use observability::{LogFormat, init_logging};
