//! Edge-side file layout.
//!
//! ```text
//! <root>/<registered-domain>/<fqdn>/
//!   artifacts/<build_id>/public/…      (unpacked site)
//!   public   → artifacts/<active>/public
//!   preview  → artifacts/<preview>/public
//! ```

use std::path::PathBuf;

use pagewright_core::error::{Error, Result};

/// A named symlink selecting which version the edge serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The live site.
    Public,
    /// The preview site.
    Preview,
}

impl Channel {
    /// Returns the symlink name for this channel.
    #[must_use]
    pub const fn link_name(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Preview => "preview",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.link_name())
    }
}

/// Path calculator for the per-site directory tree.
#[derive(Debug, Clone)]
pub struct SiteLayout {
    web_root: PathBuf,
}

impl SiteLayout {
    /// Creates a layout rooted at `web_root`.
    #[must_use]
    pub fn new(web_root: impl Into<PathBuf>) -> Self {
        Self {
            web_root: web_root.into(),
        }
    }

    /// Validates an FQDN before it is used as a path component.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty names or names that could escape
    /// the web root.
    pub fn validate_fqdn(fqdn: &str) -> Result<()> {
        let valid = !fqdn.is_empty()
            && !fqdn.starts_with('.')
            && fqdn
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
            && !fqdn.contains("..");
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!("invalid fqdn: {fqdn}")))
        }
    }

    /// Returns the registered domain (last two labels) of an FQDN.
    #[must_use]
    pub fn registered_domain(fqdn: &str) -> String {
        let labels: Vec<&str> = fqdn.split('.').collect();
        if labels.len() >= 2 {
            labels[labels.len() - 2..].join(".")
        } else {
            fqdn.to_string()
        }
    }

    /// Returns `<root>/<registered-domain>/<fqdn>`.
    #[must_use]
    pub fn site_dir(&self, fqdn: &str) -> PathBuf {
        self.web_root.join(Self::registered_domain(fqdn)).join(fqdn)
    }

    /// Returns the directory holding all unpacked versions of a site.
    #[must_use]
    pub fn artifacts_dir(&self, fqdn: &str) -> PathBuf {
        self.site_dir(fqdn).join("artifacts")
    }

    /// Returns the unpack target for one version.
    #[must_use]
    pub fn artifact_dir(&self, fqdn: &str, version: &str) -> PathBuf {
        self.artifacts_dir(fqdn).join(version)
    }

    /// Returns the channel symlink path.
    #[must_use]
    pub fn channel_link(&self, fqdn: &str, channel: Channel) -> PathBuf {
        self.site_dir(fqdn).join(channel.link_name())
    }

    /// Returns the symlink target for a version, relative to the site dir.
    #[must_use]
    pub fn relative_channel_target(version: &str) -> PathBuf {
        PathBuf::from("artifacts").join(version).join("public")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_domain_takes_last_two_labels() {
        assert_eq!(SiteLayout::registered_domain("blog.example.com"), "example.com");
        assert_eq!(SiteLayout::registered_domain("example.com"), "example.com");
        assert_eq!(SiteLayout::registered_domain("localhost"), "localhost");
    }

    #[test]
    fn layout_paths_nest_under_the_registered_domain() {
        let layout = SiteLayout::new("/var/www");
        assert_eq!(
            layout.site_dir("blog.example.com"),
            PathBuf::from("/var/www/example.com/blog.example.com")
        );
        assert_eq!(
            layout.artifact_dir("blog.example.com", "V1"),
            PathBuf::from("/var/www/example.com/blog.example.com/artifacts/V1")
        );
        assert_eq!(
            layout.channel_link("blog.example.com", Channel::Preview),
            PathBuf::from("/var/www/example.com/blog.example.com/preview")
        );
    }

    #[test]
    fn fqdn_validation_rejects_traversal() {
        assert!(SiteLayout::validate_fqdn("a.example.com").is_ok());
        assert!(SiteLayout::validate_fqdn("").is_err());
        assert!(SiteLayout::validate_fqdn("../etc").is_err());
        assert!(SiteLayout::validate_fqdn("a/b.example.com").is_err());
        assert!(SiteLayout::validate_fqdn(".hidden").is_err());
    }

    #[test]
    fn channel_targets_are_relative() {
        assert_eq!(
            SiteLayout::relative_channel_target("V1"),
            PathBuf::from("artifacts/V1/public")
        );
    }
}
