use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Sidecar mapping from a memory file's relative path to the chunk-document
/// ids it produced. The full-text engine has no "delete by memory"
/// operation, so this mapping is the sole authority for which documents to
/// remove when a memory is re-indexed or dropped.
///
/// A `BTreeMap` keeps serialization order stable so two identical index runs
/// produce byte-identical manifest files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    #[serde(rename = "byMdRelPath", default)]
    by_md_rel_path: BTreeMap<String, Vec<String>>,
}

impl ChunkManifest {
    /// Load a manifest from disk. A missing file is an empty manifest; a
    /// corrupted one is treated as empty and rebuilt by the next bulk index.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(_) => return Self::default(),
        };
        match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt chunk manifest, starting empty");
                Self::default()
            }
        }
    }

    /// Persist with write-tmp-then-rename so a crash never leaves a
    /// half-written manifest behind.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Chunk-document ids currently registered for a memory file.
    pub fn doc_ids(&self, md_rel_path: &str) -> &[String] {
        self.by_md_rel_path
            .get(md_rel_path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn replace(&mut self, md_rel_path: &str, doc_ids: Vec<String>) {
        self.by_md_rel_path.insert(md_rel_path.to_string(), doc_ids);
    }

    pub fn remove(&mut self, md_rel_path: &str) {
        self.by_md_rel_path.remove(md_rel_path);
    }

    pub fn clear(&mut self) {
        self.by_md_rel_path.clear();
    }

    pub fn len(&self) -> usize {
        self.by_md_rel_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_md_rel_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let manifest = ChunkManifest::load(&tmp.path().join("memory-manifest.json"));
        assert!(manifest.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memory-manifest.json");
        std::fs::write(&path, b"{not json").unwrap();
        let manifest = ChunkManifest::load(&path);
        assert!(manifest.is_empty());
    }

    #[test]
    fn save_load_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memory-manifest.json");

        let mut manifest = ChunkManifest::default();
        manifest.replace(
            "project-notes.md",
            vec!["memory:1:abc:0".to_string(), "memory:1:abc:1".to_string()],
        );
        manifest.save(&path).unwrap();

        let loaded = ChunkManifest::load(&path);
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.doc_ids("project-notes.md").len(), 2);
    }

    #[test]
    fn save_is_deterministic() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = tmp.path().join("a.json");
        let b = tmp.path().join("b.json");

        let mut m1 = ChunkManifest::default();
        m1.replace("z.md", vec!["memory:1:z:0".to_string()]);
        m1.replace("a.md", vec!["memory:1:a:0".to_string()]);

        let mut m2 = ChunkManifest::default();
        m2.replace("a.md", vec!["memory:1:a:0".to_string()]);
        m2.replace("z.md", vec!["memory:1:z:0".to_string()]);

        m1.save(&a).unwrap();
        m2.save(&b).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn wire_format_uses_by_md_rel_path_key() {
        let mut manifest = ChunkManifest::default();
        manifest.replace("p.md", vec!["memory:1:x:0".to_string()]);
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"byMdRelPath\""));
    }

    #[test]
    fn remove_and_clear() {
        let mut manifest = ChunkManifest::default();
        manifest.replace("a.md", vec!["memory:1:a:0".to_string()]);
        manifest.replace("b.md", vec!["memory:1:b:0".to_string()]);

        manifest.remove("a.md");
        assert!(manifest.doc_ids("a.md").is_empty());
        assert_eq!(manifest.len(), 1);

        manifest.clear();
        assert!(manifest.is_empty());
    }
}
