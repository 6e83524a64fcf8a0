//! Personal long-term memory kept as human-readable markdown partitions.
//!
//! Entries live under one memory root: `profile.md`, `facts.md` and one
//! `episodes/YYYY-MM-DD-episode.md` per day, with a key index in
//! `index/memory_keys.tsv`.  [`MemoryManager`] is the entry point.

pub mod canonical;
pub mod episode;
pub mod error;
pub mod extractor;
pub mod index;
pub mod manager;
pub mod retrieval;
pub mod schema;
pub mod store;
pub mod tokenize;

pub use canonical::{Polarity, extract_preference_entries, merge_entries_by_key, merge_profile_entries};
pub use error::MemoryError;
pub use extractor::{
    Extractor, HeuristicVerifier, NoopExtractor, PassthroughVerifier, RecentMessage, RuleExtractor,
    Verifier,
};
pub use index::KeyIndex;
pub use manager::{ExtractSummary, MemoryManager, MemoryStats, RepairReport};
pub use retrieval::{RetrievalParams, RetrievedMemory, format_memory_block, search};
pub use schema::{MemoryEntry, MemoryType};
pub use store::{MemoryStore, Partition, PurgeScope};
