//! # pagewright-store
//!
//! Content-addressed storage of opaque build artifacts plus an append-only
//! version log per site.
//!
//! Artifacts are immutable once stored: every write goes through
//! write-to-temp, fsync, rename, so readers only ever observe complete
//! archives. The version log is a flat directory of JSON files, listed
//! newest first; unreadable entries are skipped (the listing is best-effort
//! consistent).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod archive;
pub mod backend;
pub mod client;
pub mod server;

pub use archive::{pack, unpack};
pub use backend::{
    ArtifactStore, FsArtifactStore, LogEntry, MemoryArtifactStore, VersionAction,
};
pub use client::StoreClient;
pub use server::{AppState, create_router};
