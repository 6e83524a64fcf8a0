//! Flat key → partition-file index kept at `index/memory_keys.tsv`.
//!
//! The partition files remain the source of truth.  The index is a derived
//! artefact rewritten after every store mutation; if it goes stale (for
//! example after a crash between a partition write and the index write) the
//! next [`crate::store::MemoryStore::rebuild_index`] heals it.
//!
//! # Format
//!
//! One row per key, sorted by key:
//!
//! ```text
//! pref:like:奶茶\tprofile.md
//! project:lore\tfacts.md
//! standup\t2026-02-11-episode.md
//! ```
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::store::atomic_write;

pub const INDEX_DIR: &str = "index";
pub const INDEX_FILE: &str = "memory_keys.tsv";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIndex {
    rows: BTreeMap<String, String>,
}

impl KeyIndex {
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(INDEX_DIR).join(INDEX_FILE)
    }

    /// Read the index under `root`.  A missing file is an empty index;
    /// malformed rows are skipped.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path_for(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read key index {}", path.display()))?;

        let mut index = Self::default();
        let mut skipped = 0usize;
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once('\t') {
                Some((key, file)) if !key.trim().is_empty() && !file.trim().is_empty() => {
                    index.insert(key.trim(), file.trim());
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(
                skipped,
                path = %path.display(),
                "key index contains malformed rows; they were ignored"
            );
        }
        Ok(index)
    }

    /// Record `key` as living in `file_name`; a later insert for the same key
    /// replaces the earlier one.
    pub fn insert(&mut self, key: impl Into<String>, file_name: impl Into<String>) {
        self.rows.insert(key.into(), file_name.into());
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.rows.get(key.trim()).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key.trim())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn render(&self) -> String {
        self.rows
            .iter()
            .map(|(key, file)| format!("{key}\t{file}\n"))
            .collect()
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        atomic_write(&Self::path_for(root), self.render().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn later_insert_wins() {
        let mut index = KeyIndex::default();
        index.insert("standup", "2026-02-10-episode.md");
        index.insert("standup", "2026-02-11-episode.md");
        assert_eq!(index.lookup("standup"), Some("2026-02-11-episode.md"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn renders_sorted_rows() {
        let mut index = KeyIndex::default();
        index.insert("project:lore", "facts.md");
        index.insert("pref:like:tea", "profile.md");
        assert_eq!(
            index.render(),
            "pref:like:tea\tprofile.md\nproject:lore\tfacts.md\n"
        );
    }

    #[test]
    fn save_and_load_round_trip() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut index = KeyIndex::default();
        index.insert("pref:like:奶茶", "profile.md");
        index.insert("project:lore", "facts.md");
        index.save(dir.path())?;

        let loaded = KeyIndex::load(dir.path())?;
        assert_eq!(loaded, index);
        assert!(loaded.contains("project:lore"));
        Ok(())
    }

    #[test]
    fn missing_file_is_empty_index() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let index = KeyIndex::load(dir.path())?;
        assert!(index.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_rows_are_skipped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = KeyIndex::path_for(dir.path());
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, "good\tfacts.md\nno-tab-here\n\tprofile.md\nblank\t\n")?;

        let index = KeyIndex::load(dir.path())?;
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("good"), Some("facts.md"));
        Ok(())
    }
}
