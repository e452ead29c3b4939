//! Edge server configuration.
//!
//! One config file per FQDN under the sites directory, written via temp +
//! rename so the edge process only ever reads a complete config. A global
//! `000-maintenance` config turns every host into a 503. Reloads shell out
//! to the configured command; a failed reload surfaces as `Unavailable`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use pagewright_core::error::{Error, Result};

use crate::layout::SiteLayout;

const MAINTENANCE_CONFIG: &str = "000-maintenance";
const SITE_META_FILE: &str = ".edge.json";

/// Per-site edge metadata, persisted beside the site tree so alias and
/// enablement changes survive restarts and compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteMeta {
    /// Alias FQDNs served alongside the canonical name.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Whether the site serves content (disabled sites return 503).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl Default for SiteMeta {
    fn default() -> Self {
        Self {
            aliases: Vec::new(),
            enabled: true,
        }
    }
}

/// Writes edge configs and drives edge reloads.
#[derive(Debug, Clone)]
pub struct EdgeManager {
    layout: SiteLayout,
    sites_dir: PathBuf,
    reload_command: Option<String>,
    maintenance_page_dir: PathBuf,
}

impl EdgeManager {
    /// Creates an edge manager.
    ///
    /// `reload_command` is a full command line (e.g. `nginx -s reload`);
    /// `None` skips reloads (tests and dry runs).
    #[must_use]
    pub fn new(
        layout: SiteLayout,
        sites_dir: impl Into<PathBuf>,
        reload_command: Option<String>,
        maintenance_page_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            layout,
            sites_dir: sites_dir.into(),
            reload_command,
            maintenance_page_dir: maintenance_page_dir.into(),
        }
    }

    fn config_path(&self, fqdn: &str) -> PathBuf {
        self.sites_dir.join(fqdn)
    }

    fn meta_path(&self, fqdn: &str) -> PathBuf {
        self.layout.site_dir(fqdn).join(SITE_META_FILE)
    }

    /// Loads the persisted site metadata (defaults when absent).
    #[must_use]
    pub fn load_meta(&self, fqdn: &str) -> SiteMeta {
        std::fs::read(self.meta_path(fqdn))
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())
            .unwrap_or_default()
    }

    fn store_meta(&self, fqdn: &str, meta: &SiteMeta) -> Result<()> {
        let path = self.meta_path(fqdn);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::internal(format!("create site directory: {e}")))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(meta)?)
            .map_err(|e| Error::internal(format!("write site metadata: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::internal(format!("publish site metadata: {e}")))?;
        Ok(())
    }

    /// Regenerates a site's edge config from `meta` and reloads the edge.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on I/O failure, `Unavailable` when the reload
    /// command fails.
    pub async fn apply_site(&self, fqdn: &str, meta: &SiteMeta) -> Result<()> {
        SiteLayout::validate_fqdn(fqdn)?;
        for alias in &meta.aliases {
            SiteLayout::validate_fqdn(alias)?;
        }
        self.store_meta(fqdn, meta)?;

        let config = self.render_site_config(fqdn, meta);
        std::fs::create_dir_all(&self.sites_dir)
            .map_err(|e| Error::internal(format!("create sites directory: {e}")))?;
        let path = self.config_path(fqdn);
        let tmp = self.sites_dir.join(format!(".{fqdn}.tmp"));
        std::fs::write(&tmp, config)
            .map_err(|e| Error::internal(format!("write edge config: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::internal(format!("publish edge config: {e}")))?;

        self.reload().await
    }

    /// Removes a site's edge config and reloads.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on I/O failure, `Unavailable` when the reload
    /// command fails.
    pub async fn remove_site(&self, fqdn: &str) -> Result<()> {
        SiteLayout::validate_fqdn(fqdn)?;
        match std::fs::remove_file(self.config_path(fqdn)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::internal(format!("remove edge config: {e}"))),
        }
        self.reload().await
    }

    /// Installs or removes the global maintenance config and reloads.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on I/O failure, `Unavailable` when the reload
    /// command fails.
    pub async fn set_maintenance(&self, enabled: bool) -> Result<()> {
        let path = self.sites_dir.join(MAINTENANCE_CONFIG);
        if enabled {
            std::fs::create_dir_all(&self.sites_dir)
                .map_err(|e| Error::internal(format!("create sites directory: {e}")))?;
            std::fs::write(&path, self.render_maintenance_config())
                .map_err(|e| Error::internal(format!("write maintenance config: {e}")))?;
        } else {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::internal(format!("remove maintenance config: {e}"))),
            }
        }
        self.reload().await
    }

    /// Returns whether maintenance mode is active (config file present).
    #[must_use]
    pub fn is_maintenance(&self) -> bool {
        self.sites_dir.join(MAINTENANCE_CONFIG).is_file()
    }

    /// Runs the configured reload command.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the command cannot run or exits non-zero.
    pub async fn reload(&self) -> Result<()> {
        let Some(command) = &self.reload_command else {
            tracing::debug!("edge reload skipped: no reload command configured");
            return Ok(());
        };
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(Error::InvalidInput("invalid reload command".to_string()));
        };

        let output = tokio::process::Command::new(program)
            .args(parts)
            .output()
            .await
            .map_err(|e| Error::unavailable_with_source("edge reload failed to start", e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::unavailable(format!(
                "edge reload failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn render_site_config(&self, fqdn: &str, meta: &SiteMeta) -> String {
        let site_path = self.layout.site_dir(fqdn);
        let mut server_name = fqdn.to_string();
        for alias in &meta.aliases {
            server_name.push(' ');
            server_name.push_str(alias);
        }

        if meta.enabled {
            format!(
                "server {{\n    listen 80;\n    server_name {server_name};\n\n    root {root}/public;\n    index index.html;\n\n    location / {{\n        try_files $uri $uri/ =404;\n    }}\n\n    location /preview/ {{\n        alias {root}/preview/;\n        try_files $uri $uri/ =404;\n    }}\n\n    add_header X-Frame-Options \"SAMEORIGIN\" always;\n    add_header X-Content-Type-Options \"nosniff\" always;\n}}\n",
                root = site_path.display(),
            )
        } else {
            format!(
                "server {{\n    listen 80;\n    server_name {server_name};\n\n    location / {{\n        return 503;\n    }}\n\n    error_page 503 @maintenance;\n    location @maintenance {{\n        root {maintenance};\n        try_files /503.html =503;\n    }}\n}}\n",
                maintenance = self.maintenance_page_dir.display(),
            )
        }
    }

    fn render_maintenance_config(&self) -> String {
        format!(
            "server {{\n    listen 80 default_server;\n    server_name _;\n\n    location / {{\n        return 503;\n    }}\n\n    error_page 503 @maintenance;\n    location @maintenance {{\n        root {maintenance};\n        try_files /503.html =503;\n    }}\n}}\n",
            maintenance = self.maintenance_page_dir.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn edge(root: &Path, sites: &Path) -> EdgeManager {
        EdgeManager::new(
            SiteLayout::new(root),
            sites,
            None,
            "/var/www/maintenance",
        )
    }

    const FQDN: &str = "a.example.com";

    #[tokio::test]
    async fn config_lists_canonical_name_and_aliases() {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let edge = edge(root.path(), sites.path());

        let meta = SiteMeta {
            aliases: vec!["b.example.com".to_string(), "c.example.com".to_string()],
            enabled: true,
        };
        edge.apply_site(FQDN, &meta).await.expect("apply");

        let config = std::fs::read_to_string(sites.path().join(FQDN)).expect("read config");
        assert!(config.contains("server_name a.example.com b.example.com c.example.com;"));
        assert!(config.contains("try_files"));
        // No half-written temp files remain.
        let leftovers: Vec<_> = std::fs::read_dir(sites.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().into_string().expect("name"))
            .filter(|name| name.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn disabled_site_renders_a_503_block() {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let edge = edge(root.path(), sites.path());

        let meta = SiteMeta {
            aliases: Vec::new(),
            enabled: false,
        };
        edge.apply_site(FQDN, &meta).await.expect("apply");

        let config = std::fs::read_to_string(sites.path().join(FQDN)).expect("read config");
        assert!(config.contains("return 503;"));
        assert!(!config.contains("try_files $uri"));
    }

    #[tokio::test]
    async fn meta_round_trips_through_disk() {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let edge = edge(root.path(), sites.path());

        let meta = SiteMeta {
            aliases: vec!["b.example.com".to_string()],
            enabled: false,
        };
        edge.apply_site(FQDN, &meta).await.expect("apply");

        let loaded = edge.load_meta(FQDN);
        assert_eq!(loaded.aliases, vec!["b.example.com"]);
        assert!(!loaded.enabled);

        // Unknown sites get defaults.
        let fresh = edge.load_meta("new.example.com");
        assert!(fresh.enabled);
        assert!(fresh.aliases.is_empty());
    }

    #[tokio::test]
    async fn maintenance_mode_installs_and_removes_the_global_config() {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let edge = edge(root.path(), sites.path());

        assert!(!edge.is_maintenance());
        edge.set_maintenance(true).await.expect("enable");
        assert!(edge.is_maintenance());
        let config =
            std::fs::read_to_string(sites.path().join("000-maintenance")).expect("read config");
        assert!(config.contains("default_server"));

        edge.set_maintenance(false).await.expect("disable");
        assert!(!edge.is_maintenance());
    }

    #[tokio::test]
    async fn remove_site_is_idempotent() {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let edge = edge(root.path(), sites.path());

        edge.apply_site(FQDN, &SiteMeta::default()).await.expect("apply");
        edge.remove_site(FQDN).await.expect("remove");
        assert!(!sites.path().join(FQDN).exists());
        edge.remove_site(FQDN).await.expect("remove again");
    }

    #[tokio::test]
    async fn invalid_alias_is_rejected() {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let edge = edge(root.path(), sites.path());

        let meta = SiteMeta {
            aliases: vec!["../evil".to_string()],
            enabled: true,
        };
        assert!(edge.apply_site(FQDN, &meta).await.is_err());
    }

    #[tokio::test]
    async fn failing_reload_command_is_unavailable() {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let edge = EdgeManager::new(
            SiteLayout::new(root.path()),
            sites.path(),
            Some("false".to_string()),
            "/var/www/maintenance",
        );
        let err = edge.reload().await.unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }
}
