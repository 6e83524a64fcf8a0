use std::path::Path;

use anyhow::Result;
use lore_config::MemoryConfig;
use tracing::{debug, info};

use crate::extractor::{Extractor, HeuristicVerifier, NoopExtractor, Verifier};
use crate::retrieval::{RetrievalParams, RetrievedMemory, format_memory_block, search};
use crate::schema::{MemoryEntry, MemoryType, normalize_tags, now_local};
use crate::store::{MemoryStore, PurgeScope};

mod maintenance;
mod pipeline;

pub use maintenance::RepairReport;
pub use pipeline::ExtractSummary;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total: usize,
    pub profile: usize,
    pub facts: usize,
    pub episodes: usize,
    /// Day files currently present under `episodes/`.
    pub episode_files: usize,
    /// Rows in the key index.
    pub index_size: usize,
}

/// Entry point for callers: owns the store, the configuration and the
/// extraction capabilities.
pub struct MemoryManager {
    config: MemoryConfig,
    store: MemoryStore,
    extractor: Box<dyn Extractor>,
    verifier: Box<dyn Verifier>,
}

impl MemoryManager {
    /// Open the store under `config.root` (relative roots resolve against
    /// `project_root`) and prune expired episodes.
    pub fn open(config: &MemoryConfig, project_root: impl AsRef<Path>) -> Result<Self> {
        let root = config.resolve_root(project_root);
        let store = MemoryStore::open(&root)?;
        let manager = Self {
            config: config.clone(),
            store,
            extractor: Box::new(NoopExtractor),
            verifier: Box::new(HeuristicVerifier),
        };
        let pruned = manager.prune_episodes()?;

        let stats = manager.stats()?;
        info!(
            root = %root.display(),
            profile = stats.profile,
            facts = stats.facts,
            episodes = stats.episodes,
            pruned,
            "memory opened"
        );
        Ok(manager)
    }

    pub fn with_extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn with_verifier(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifier = Box::new(verifier);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn entries(&self) -> Result<Vec<MemoryEntry>> {
        self.store.load_all()
    }

    /// Rank stored entries against `query` using the configured parameters.
    pub fn search(&self, query: &str) -> Result<Vec<RetrievedMemory>> {
        self.search_with(query, &RetrievalParams::from(&self.config))
    }

    pub fn search_with(&self, query: &str, params: &RetrievalParams) -> Result<Vec<RetrievedMemory>> {
        self.prune_episodes()?;
        let entries = self.store.load_all()?;
        let results = search(&entries, query, params, now_local());
        debug!(candidates = entries.len(), results = results.len(), "memory search");
        Ok(results)
    }

    /// Prompt block for `query`, `None` when nothing matched.
    pub fn memory_block(&self, query: &str) -> Result<Option<String>> {
        Ok(format_memory_block(&self.search(query)?))
    }

    /// Store one entry directly.  Empty `tags` default to the type label.
    ///
    /// Profile and fact entries are then merged into their partition the way
    /// extracted ones are, so the stored form may carry a canonical
    /// preference key and an older statement about the same item is dropped.
    pub fn add(
        &self,
        key: &str,
        mem_type: MemoryType,
        content: &str,
        tags: &[String],
    ) -> Result<MemoryEntry> {
        let mut tags = normalize_tags(tags);
        if tags.is_empty() {
            tags.push(mem_type.label().to_string());
        }
        let entry = MemoryEntry::new(key, mem_type, content, now_local()).with_tags(tags);
        let written = self.store.upsert(entry)?;
        if written.mem_type != MemoryType::Episode {
            self.repair_with(written.mem_type, std::slice::from_ref(&written))?;
        }
        info!(key = %written.key, mem_type = %written.mem_type, "memory added");
        Ok(written)
    }

    pub fn purge(&self, scope: PurgeScope) -> Result<()> {
        self.store.purge(scope)
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        let entries = self.store.load_all()?;
        let count = |t: MemoryType| entries.iter().filter(|e| e.mem_type == t).count();
        Ok(MemoryStats {
            total: entries.len(),
            profile: count(MemoryType::Profile),
            facts: count(MemoryType::Fact),
            episodes: count(MemoryType::Episode),
            episode_files: self.store.episode_files()?.len(),
            index_size: self.store.index()?.len(),
        })
    }
}
