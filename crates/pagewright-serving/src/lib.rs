//! # pagewright-serving
//!
//! The serving runner owns the edge-side file layout. For every FQDN it
//! maintains unpacked artifact trees, the `public`/`preview` channel
//! symlinks, and the edge server's config.
//!
//! The symlink flip is the only commit point: a channel either points at a
//! fully-unpacked, readable version or does not exist. Activations are
//! monotone in the job's fencing token, so a stale worker's output can be
//! stored but never served.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod deploy;
pub mod edge;
pub mod layout;
pub mod server;

pub use deploy::DeployManager;
pub use edge::{EdgeManager, SiteMeta};
pub use layout::{Channel, SiteLayout};
pub use server::{AppState, create_router};
