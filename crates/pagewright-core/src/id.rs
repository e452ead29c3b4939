//! Strongly-typed identifiers for PageWright entities.
//!
//! Identifiers fall in two families:
//!
//! - **Platform-issued** (`JobId`, `WorkerId`): generated as ULIDs, so they
//!   sort by creation time and need no coordination.
//! - **Externally-issued** (`SiteId`, `BuildId`): opaque strings owned by the
//!   caller. The platform never interprets them beyond non-emptiness; a
//!   `BuildId` allocated by the manager happens to be a ULID, but any opaque
//!   value from a request is accepted.
//!
//! All four are distinct newtypes so they cannot be mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a new unique id (ULID-encoded).
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new().to_string())
            }

            /// Wraps an externally-issued opaque id.
            ///
            /// # Errors
            ///
            /// Returns `InvalidId` if the value is empty or whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(Error::InvalidId {
                        message: format!("{} must not be empty", stringify!($name)),
                    });
                }
                Ok(Self(value))
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }
    };
}

opaque_id! {
    /// Identifier of a site (a deployable web property).
    ///
    /// Issued by the intake layer; immutable for the life of the site.
    SiteId
}

opaque_id! {
    /// Identifier of a build artifact version, scoped to a site.
    ///
    /// Doubles as `source_version` / `target_version` on jobs. Once an
    /// artifact is stored under a `BuildId` it is never reused, even if the
    /// producing job failed.
    BuildId
}

opaque_id! {
    /// Identifier of a mutation job.
    JobId
}

opaque_id! {
    /// Identifier of an ephemeral worker bound to one job.
    WorkerId
}
