//! Artifact deployment, channel activation, and version retention.
//!
//! Commit discipline, in order of appearance:
//!
//! - **Unpack** goes to a staging directory, then one `rename` publishes
//!   the whole tree — a reader of `artifacts/<id>/` sees all of it or none.
//! - **Activation** first advances the site's persisted fencing high-water
//!   mark, then flips the channel symlink via temp-name + `rename`. A
//!   fencing token below the mark is refused: a stale worker's upload can
//!   exist in the store but never reaches a channel.
//! - **Retention** runs after each deploy and never touches the versions
//!   the channel symlinks point at.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::{BuildId, SiteId};
use pagewright_core::observability::deploy_span;
use pagewright_store::archive;
use pagewright_store::client::StoreClient;

use crate::layout::{Channel, SiteLayout};

const ACTIVATION_STATE_FILE: &str = ".activation.json";
const STAGING_PREFIX: &str = ".staging-";

/// Persisted per-site activation high-water mark.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ActivationState {
    fencing_token: u64,
}

/// Deploys artifacts into the site tree and manages channel activation.
#[derive(Debug, Clone)]
pub struct DeployManager {
    layout: SiteLayout,
    store: StoreClient,
    max_versions: usize,
}

impl DeployManager {
    /// Creates a deploy manager.
    #[must_use]
    pub fn new(layout: SiteLayout, store: StoreClient, max_versions: usize) -> Self {
        Self {
            layout,
            store,
            max_versions,
        }
    }

    /// Returns the layout used by this manager.
    #[must_use]
    pub fn layout(&self) -> &SiteLayout {
        &self.layout
    }

    /// Fetches `(site_id, version)` from the store and unpacks it into the
    /// site tree, then prunes old versions.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the artifact is missing from the store,
    /// `Unavailable` if the store is unreachable.
    pub async fn deploy(&self, fqdn: &str, site_id: &SiteId, version: &BuildId) -> Result<()> {
        SiteLayout::validate_fqdn(fqdn)?;
        let span = deploy_span("deploy", fqdn, version.as_str());
        let _guard = span.enter();

        let data = self.store.get_artifact(site_id, version).await?;
        self.deploy_bytes(fqdn, version.as_str(), &data)?;
        self.retain(fqdn);
        Ok(())
    }

    /// Unpacks artifact bytes into `artifacts/<version>/` atomically.
    ///
    /// Re-deploying an existing version is a no-op: the published tree is
    /// immutable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for traversal attempts in the archive,
    /// `Internal` on I/O failure.
    pub fn deploy_bytes(&self, fqdn: &str, version: &str, data: &[u8]) -> Result<()> {
        SiteLayout::validate_fqdn(fqdn)?;
        let final_dir = self.layout.artifact_dir(fqdn, version);
        if final_dir.is_dir() {
            tracing::debug!(fqdn, version, "version already deployed");
            return Ok(());
        }

        let artifacts_dir = self.layout.artifacts_dir(fqdn);
        std::fs::create_dir_all(&artifacts_dir)
            .map_err(|e| Error::internal(format!("create artifacts directory: {e}")))?;

        // Stage inside artifacts/ so the publishing rename stays on one
        // filesystem.
        let staging = artifacts_dir.join(format!("{STAGING_PREFIX}{}", Ulid::new()));
        let publish = || -> Result<()> {
            archive::unpack(data, &staging)?;
            std::fs::rename(&staging, &final_dir)
                .map_err(|e| Error::internal(format!("publish version directory: {e}")))
        };
        if let Err(e) = publish() {
            let _ = std::fs::remove_dir_all(&staging);
            // A concurrent deploy of the same version may have won the
            // rename; the published tree is identical.
            if final_dir.is_dir() {
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Atomically points `channel` at an already-deployed version.
    ///
    /// `fencing_token` carries the producing job's token; activations below
    /// the site's high-water mark are refused (stale worker). `None` skips
    /// the advance (manual re-activation) but still never lowers the mark.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the version is not deployed (or has no `public/`)
    /// - `PreconditionFailed` when the fencing token is stale
    /// - `Internal` on I/O failure
    pub fn activate(
        &self,
        fqdn: &str,
        version: &str,
        channel: Channel,
        fencing_token: Option<u64>,
    ) -> Result<()> {
        SiteLayout::validate_fqdn(fqdn)?;
        let span = deploy_span("activate", fqdn, version);
        let _guard = span.enter();

        let target_public = self.layout.artifact_dir(fqdn, version).join("public");
        if !target_public.is_dir() {
            return Err(Error::NotFound(format!(
                "artifact public directory not found for {fqdn} version {version}"
            )));
        }

        self.advance_fence(fqdn, fencing_token)?;

        // Build the new link under a temporary name, then rename over the
        // channel link. The rename is the commit point.
        let site_dir = self.layout.site_dir(fqdn);
        let link = self.layout.channel_link(fqdn, channel);
        let tmp = site_dir.join(format!(".{}.tmp-{}", channel.link_name(), Ulid::new()));
        let relative = SiteLayout::relative_channel_target(version);

        std::os::unix::fs::symlink(&relative, &tmp)
            .map_err(|e| Error::internal(format!("create channel symlink: {e}")))?;
        if let Err(e) = std::fs::rename(&tmp, &link) {
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::internal(format!("flip channel symlink: {e}")));
        }

        tracing::info!(fqdn, version, channel = %channel, "channel activated");
        Ok(())
    }

    fn activation_state_path(&self, fqdn: &str) -> std::path::PathBuf {
        self.layout.site_dir(fqdn).join(ACTIVATION_STATE_FILE)
    }

    /// Reads the persisted high-water mark (0 when absent).
    fn read_fence(&self, fqdn: &str) -> u64 {
        std::fs::read(self.activation_state_path(fqdn))
            .ok()
            .and_then(|data| serde_json::from_slice::<ActivationState>(&data).ok())
            .map(|state| state.fencing_token)
            .unwrap_or(0)
    }

    fn advance_fence(&self, fqdn: &str, fencing_token: Option<u64>) -> Result<()> {
        let Some(token) = fencing_token else {
            return Ok(());
        };
        let current = self.read_fence(fqdn);
        if token < current {
            return Err(Error::precondition_failed(format!(
                "stale fencing token {token} for {fqdn}: already activated {current}"
            )));
        }
        if token == current {
            return Ok(());
        }

        // Advance before the flip: a crash between the two leaves the mark
        // ahead of the channel, which only ever refuses stale work.
        let path = self.activation_state_path(fqdn);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::internal(format!("create site directory: {e}")))?;
        }
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec(&ActivationState {
            fencing_token: token,
        })?;
        std::fs::write(&tmp, data)
            .map_err(|e| Error::internal(format!("write activation state: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::internal(format!("publish activation state: {e}")))?;
        Ok(())
    }

    /// Returns the version a channel currently serves, if any.
    #[must_use]
    pub fn active_version(&self, fqdn: &str, channel: Channel) -> Option<String> {
        let link = self.layout.channel_link(fqdn, channel);
        let target = std::fs::read_link(link).ok()?;
        // Target shape: artifacts/<version>/public
        let mut components = target.components();
        components.next()?;
        components
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
    }

    /// Prunes unprotected versions beyond `max_versions`, newest first.
    /// Channel targets are never pruned. Best-effort: failures are logged.
    pub fn retain(&self, fqdn: &str) {
        let artifacts_dir = self.layout.artifacts_dir(fqdn);
        let entries = match std::fs::read_dir(&artifacts_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let protected: Vec<String> = [Channel::Public, Channel::Preview]
            .into_iter()
            .filter_map(|channel| self.active_version(fqdn, channel))
            .collect();

        let mut unprotected: Vec<(String, std::time::SystemTime)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() || protected.iter().any(|p| p == &name) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            unprotected.push((name, modified));
        }

        // Newest first; everything past the cap goes.
        unprotected.sort_by(|a, b| b.1.cmp(&a.1));
        for (name, _) in unprotected.into_iter().skip(self.max_versions) {
            let path = artifacts_dir.join(&name);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => tracing::info!(fqdn, version = %name, "pruned old version"),
                Err(e) => {
                    tracing::warn!(fqdn, version = %name, error = %e, "failed to prune version");
                }
            }
        }
    }

    /// Recursively deletes a site's directory tree.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on I/O failure. Removing an absent site is fine.
    pub fn remove_site(&self, fqdn: &str) -> Result<()> {
        SiteLayout::validate_fqdn(fqdn)?;
        let site_dir = self.layout.site_dir(fqdn);
        match std::fs::remove_dir_all(&site_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::internal(format!("remove site tree: {e}"))),
        }
    }
}

/// Builds a deployable archive from a file list (tests).
#[cfg(test)]
fn test_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let dir = tempfile::tempdir().expect("tempdir");
    for (path, contents) in files {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
        std::fs::write(full, contents).expect("write");
    }
    archive::pack(dir.path()).expect("pack").to_vec()
}
