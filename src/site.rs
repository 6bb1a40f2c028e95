//! Minimal on-disk storage interfaces the transport needs: read a published
//! file by its logical path, write an assembled download to a logical path,
//! and walk a site's directory tree for bulk publish. Page rendering and the
//! browser-facing HTTP form live outside this crate.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Root directory under which every site's files live, one subdirectory per
/// site name (mirrors the Python original's `MEDIA_DOWNLOAD_DIR/<project>`).
#[derive(Debug, Clone)]
pub struct SiteStore {
    root: PathBuf,
}

impl SiteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SiteStore { root: root.into() }
    }

    /// `filepath` is the logical `site/page` path used as both tracker key
    /// and peer-to-peer `filepath`/`filename` field.
    pub fn read(&self, filepath: &str) -> Result<Vec<u8>> {
        let path = self.resolve(filepath)?;
        fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }

    pub fn write(&self, filepath: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(filepath)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    pub fn exists(&self, filepath: &str) -> bool {
        self.resolve(filepath).map(|p| p.exists()).unwrap_or(false)
    }

    /// Every file under `<root>/<site>`, as logical `site/relative` paths,
    /// mirroring `client.py::post_site_pages`'s `os.walk`.
    pub fn walk_site(&self, site: &str) -> Result<Vec<String>> {
        let base = self.root.join(site);
        let mut out = Vec::new();
        if base.exists() {
            walk_into(&base, &self.root, &mut out)?;
        }
        Ok(out)
    }

    fn resolve(&self, filepath: &str) -> Result<PathBuf> {
        if filepath.contains("..") || Path::new(filepath).is_absolute() {
            anyhow::bail!("invalid logical path: {filepath}");
        }
        Ok(self.root.join(filepath))
    }
}

fn walk_into(dir: &Path, root: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_into(&path, root, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_published_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        store.write("site/index.html", b"<html>ok</html>").unwrap();
        assert_eq!(store.read("site/index.html").unwrap(), b"<html>ok</html>");
    }

    #[test]
    fn walk_site_lists_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        store.write("site/index.html", b"a").unwrap();
        store.write("site/css/style.css", b"b").unwrap();
        let mut files = store.walk_site("site").unwrap();
        files.sort();
        assert_eq!(files, vec!["site/css/style.css", "site/index.html"]);
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        assert!(store.read("../etc/passwd").is_err());
    }

    #[test]
    fn rejects_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = SiteStore::new(dir.path());
        assert!(store.read("/etc/passwd").is_err());
    }
}
