//! Artifact archive handling (tar.gz).
//!
//! Unpacking guards against path traversal: an entry whose cleaned
//! destination would escape the target directory is rejected outright.
//! Only regular files and directories are materialized; links and device
//! nodes in an archive are refused.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use pagewright_core::error::{Error, Result};

/// Packs a directory tree into a tar.gz archive.
///
/// Entry names are relative to `dir`; the root itself is not an entry.
///
/// # Errors
///
/// Returns `Internal` when the tree cannot be read or encoded.
pub fn pack(dir: &Path) -> Result<Bytes> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| Error::internal(format!("pack {}: {e}", dir.display())))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| Error::internal(format!("finish archive: {e}")))?;
    let data = encoder
        .finish()
        .map_err(|e| Error::internal(format!("finish compression: {e}")))?;
    Ok(Bytes::from(data))
}

/// Resolves an archive entry path against `dest`, rejecting traversal.
fn guarded_destination(dest: &Path, entry_path: &Path) -> Result<PathBuf> {
    let mut resolved = dest.to_path_buf();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidInput(format!(
                    "invalid file path in archive: {}",
                    entry_path.display()
                )));
            }
        }
    }
    if !resolved.starts_with(dest) {
        return Err(Error::InvalidInput(format!(
            "invalid file path in archive: {}",
            entry_path.display()
        )));
    }
    Ok(resolved)
}

/// Unpacks a tar.gz archive into `dest`.
///
/// # Errors
///
/// Returns `InvalidInput` for traversal attempts or unsupported entry
/// types, `Internal` for I/O failures.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .map_err(|e| Error::internal(format!("create {}: {e}", dest.display())))?;

    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let entries = archive
        .entries()
        .map_err(|e| Error::internal(format!("read archive: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::internal(format!("read archive entry: {e}")))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::internal(format!("read entry path: {e}")))?
            .into_owned();
        let target = guarded_destination(dest, &entry_path)?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&target)
                    .map_err(|e| Error::internal(format!("create {}: {e}", target.display())))?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::internal(format!("create {}: {e}", parent.display()))
                    })?;
                }
                let mut contents = Vec::new();
                entry
                    .read_to_end(&mut contents)
                    .map_err(|e| Error::internal(format!("read entry contents: {e}")))?;
                std::fs::write(&target, contents)
                    .map_err(|e| Error::internal(format!("write {}: {e}", target.display())))?;
            }
            other => {
                return Err(Error::InvalidInput(format!(
                    "unsupported archive entry type {other:?}: {}",
                    entry_path.display()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;

    fn write_tree(root: &Path, files: &[(&str, &str)]) {
        for (path, contents) in files {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
            std::fs::write(full, contents).expect("write");
        }
    }

    fn read_tree(root: &Path) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).expect("read dir") {
                let entry = entry.expect("entry");
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path
                        .strip_prefix(root)
                        .expect("prefix")
                        .to_string_lossy()
                        .into_owned();
                    let contents = std::fs::read_to_string(&path).expect("read");
                    out.push((rel, contents));
                }
            }
        }
        out.sort();
        out
    }

    #[test]
    fn pack_then_unpack_preserves_the_tree() {
        let src = tempfile::tempdir().expect("src");
        write_tree(
            src.path(),
            &[
                ("index.html", "<h1>home</h1>"),
                ("pages/about.md", "# About"),
                (".codex/instructions.md", "add an about page"),
            ],
        );

        let archive = pack(src.path()).expect("pack");

        let dst = tempfile::tempdir().expect("dst");
        unpack(&archive, dst.path()).expect("unpack");

        assert_eq!(read_tree(src.path()), read_tree(dst.path()));
    }

    #[test]
    fn unpack_into_missing_directory_creates_it() {
        let src = tempfile::tempdir().expect("src");
        write_tree(src.path(), &[("a.txt", "a")]);
        let archive = pack(src.path()).expect("pack");

        let dst = tempfile::tempdir().expect("dst");
        let nested = dst.path().join("deep/site");
        unpack(&archive, &nested).expect("unpack");
        assert!(nested.join("a.txt").is_file());
    }

    fn archive_with_entry(name: &str, contents: &[u8]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        // `set_path` validates against `..` components, which is exactly what
        // these tests need to bypass to construct a malicious entry; write
        // the raw name bytes directly instead.
        let name_bytes = name.as_bytes();
        header.as_old_mut().name[..name_bytes.len()].copy_from_slice(name_bytes);
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, contents).expect("append");
        builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip")
    }

    #[test]
    fn traversal_entries_are_rejected() {
        let archive = archive_with_entry("../escape.txt", b"nope");
        let dst = tempfile::tempdir().expect("dst");
        let err = unpack(&archive, dst.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!dst.path().parent().expect("parent").join("escape.txt").exists());
    }

    #[test]
    fn nested_traversal_is_rejected() {
        let archive = archive_with_entry("ok/../../escape.txt", b"nope");
        let dst = tempfile::tempdir().expect("dst");
        assert!(unpack(&archive, dst.path()).is_err());
    }

    #[test]
    fn symlink_entries_are_refused() {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_link(&mut header, "link", "/etc/passwd")
            .expect("append");
        let archive = builder
            .into_inner()
            .expect("tar")
            .finish()
            .expect("gzip");

        let dst = tempfile::tempdir().expect("dst");
        let err = unpack(&archive, dst.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn empty_directory_round_trips_to_empty() {
        let src = tempfile::tempdir().expect("src");
        let archive = pack(src.path()).expect("pack");
        let dst = tempfile::tempdir().expect("dst");
        unpack(&archive, dst.path()).expect("unpack");
        assert!(read_tree(dst.path()).is_empty());
    }
}
