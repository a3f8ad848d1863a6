//! Repository registration and content addressing
//!
//! Uploads land under `paths.repo_root/<hash>/...`, where the hash is a
//! SHA-256 over the candidate tree (sorted relative paths plus contents).
//! Identical content therefore always maps to the same directory, and the
//! derived full name makes duplicate registrations visible as conflicts.

use crate::error::{Error, Result};
use crate::lang;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Candidate files of a tree in deterministic order
fn candidate_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkBuilder::new(root).hidden(true).build() {
        let entry = entry.map_err(|e| Error::Input(format!("unreadable tree: {}", e)))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        if lang::is_candidate(&rel.to_string_lossy()) {
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

/// SHA-256 of the candidate tree, hex-encoded
pub fn hash_tree(root: &Path) -> Result<String> {
    if !root.is_dir() {
        return Err(Error::Input(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut hasher = Sha256::new();
    for rel in candidate_files(root)? {
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let bytes = std::fs::read(root.join(&rel))?;
        hasher.update(&bytes);
        hasher.update([0u8]);
    }

    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Display name for a tree: the explicit override or the directory name
pub fn display_name(root: &Path, name: Option<String>) -> String {
    name.unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string())
    })
}

/// Full name: `<name>#<hash prefix>`. Content-addressed, so re-uploading
/// identical content collides on purpose.
pub fn full_name(name: &str, tree_hash: &str) -> String {
    let prefix: String = tree_hash.chars().take(12).collect();
    format!("{}#{}", name, prefix)
}

/// Materialize a source tree under `repo_root/<hash>/`. Already-imported
/// trees (same hash) are reused without copying.
pub fn materialize(source: &Path, repo_root: &Path, tree_hash: &str) -> Result<PathBuf> {
    let target = repo_root.join(tree_hash);
    if target.is_dir() {
        debug!(target = %target.display(), "content already imported");
        return Ok(target);
    }

    std::fs::create_dir_all(&target)?;
    let mut copied = 0usize;
    for rel in candidate_files(source)? {
        let dest = target.join(&rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source.join(&rel), dest)?;
        copied += 1;
    }

    info!(
        source = %source.display(),
        target = %target.display(),
        files = copied,
        "imported repository"
    );
    Ok(target)
}

/// Remove an imported tree, but only when it actually lives under the
/// configured repo root. Missing directories are fine.
pub fn remove_imported(local_path: &Path, repo_root: &Path) -> Result<bool> {
    let canonical_root = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let canonical = local_path
        .canonicalize()
        .unwrap_or_else(|_| local_path.to_path_buf());

    if !canonical.starts_with(&canonical_root) {
        return Ok(false);
    }
    if !canonical.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&canonical)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_hash_is_deterministic_and_content_sensitive() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        write(&a, "src/main.py", "print('x')\n");
        write(&b, "src/main.py", "print('x')\n");

        let ha = hash_tree(&a).unwrap();
        let hb = hash_tree(&b).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 64);

        write(&b, "src/main.py", "print('y')\n");
        assert_ne!(ha, hash_tree(&b).unwrap());
    }

    #[test]
    fn test_hash_ignores_skip_set() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        std::fs::create_dir_all(&a).unwrap();
        write(&a, "main.py", "print('x')\n");
        let before = hash_tree(&a).unwrap();

        write(&a, "debug.log", "noise\n");
        assert_eq!(before, hash_tree(&a).unwrap());
    }

    #[test]
    fn test_materialize_and_remove() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src_tree");
        let root = tmp.path().join("repos");
        std::fs::create_dir_all(&source).unwrap();
        write(&source, "lib/util.py", "def f(): pass\n");
        write(&source, "image.png", "\u{89}PNG");

        let hash = hash_tree(&source).unwrap();
        let imported = materialize(&source, &root, &hash).unwrap();
        assert!(imported.join("lib/util.py").exists());
        // Skip-set files are not imported.
        assert!(!imported.join("image.png").exists());

        // Second import of the same content is a no-op.
        let again = materialize(&source, &root, &hash).unwrap();
        assert_eq!(imported, again);

        assert!(remove_imported(&imported, &root).unwrap());
        assert!(!imported.exists());
        // Removing again is a no-op success.
        assert!(!remove_imported(&imported, &root).unwrap());
    }

    #[test]
    fn test_remove_refuses_outside_root() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("elsewhere");
        std::fs::create_dir_all(&outside).unwrap();
        let root = tmp.path().join("repos");
        std::fs::create_dir_all(&root).unwrap();
        assert!(!remove_imported(&outside, &root).unwrap());
        assert!(outside.exists());
    }

    #[test]
    fn test_names() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("myproj");
        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(display_name(&dir, None), "myproj");
        assert_eq!(display_name(&dir, Some("custom".into())), "custom");
        assert_eq!(full_name("myproj", &"ab".repeat(32)), format!("myproj#{}", "ab".repeat(6)));
    }
}
