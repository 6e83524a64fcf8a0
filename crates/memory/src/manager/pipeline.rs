//! Auto-extraction: propose, verify, add deterministic preferences, commit,
//! then repair the touched partitions.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::canonical::extract_preference_entries;
use crate::episode::is_episode_trigger;
use crate::extractor::RecentMessage;
use crate::schema::{MemoryEntry, MemoryType, now_local};

use super::{MemoryManager, RepairReport};

/// What one extraction pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractSummary {
    /// Entries proposed by the extractor.
    pub proposed: usize,
    /// Proposals surviving verification.
    pub verified: usize,
    /// Preferences found by the deterministic parser.
    pub deterministic: usize,
    /// Type forced onto every entry, if any.
    pub forced_type: Option<MemoryType>,
    pub skipped_invalid: usize,
    pub written: Vec<MemoryEntry>,
    pub repaired: Vec<RepairReport>,
}

impl MemoryManager {
    /// Run [`MemoryManager::extract_and_commit`] unless auto-extraction is
    /// disabled in the configuration.
    pub fn maybe_auto_extract(
        &self,
        user_text: &str,
        recent: &[RecentMessage],
        type_override: Option<MemoryType>,
    ) -> Result<ExtractSummary> {
        if !self.config.enable_auto_extract {
            debug!("auto-extract disabled; skipping");
            return Ok(ExtractSummary::default());
        }
        self.extract_and_commit(user_text, recent, type_override)
    }

    /// Extract memories from `user_text` and persist them.
    ///
    /// An explicit `type_override` wins; otherwise a configured episode
    /// trigger keyword forces every entry to [`MemoryType::Episode`].
    pub fn extract_and_commit(
        &self,
        user_text: &str,
        recent: &[RecentMessage],
        type_override: Option<MemoryType>,
    ) -> Result<ExtractSummary> {
        self.prune_episodes()?;
        let now = now_local();

        let proposed = self.extractor.extract(user_text, recent);
        let proposed_count = proposed.len();
        let verified = if proposed.is_empty() {
            Vec::new()
        } else {
            self.verifier.verify(user_text, proposed, recent)
        };
        let verified_count = verified.len();
        let deterministic = extract_preference_entries(user_text, now);
        let deterministic_count = deterministic.len();

        let forced_type = type_override.or_else(|| {
            is_episode_trigger(user_text, &self.config.episode_trigger_keywords)
                .then_some(MemoryType::Episode)
        });

        let mut skipped_invalid = 0usize;
        let mut batch = Vec::with_capacity(verified_count + deterministic_count);
        for entry in verified.into_iter().chain(deterministic) {
            let mut entry = entry.normalized();
            if let Some(mem_type) = forced_type {
                entry.mem_type = mem_type;
            }
            if let Err(err) = entry.validate() {
                warn!(key = %entry.key, error = %err, "skipping invalid extracted memory");
                skipped_invalid += 1;
                continue;
            }
            batch.push(entry);
        }

        let mut summary = ExtractSummary {
            proposed: proposed_count,
            verified: verified_count,
            deterministic: deterministic_count,
            forced_type,
            skipped_invalid,
            ..ExtractSummary::default()
        };
        if batch.is_empty() {
            debug!(proposed = proposed_count, "nothing to commit");
            return Ok(summary);
        }

        summary.written = self.store.upsert_all(batch)?;
        for mem_type in [MemoryType::Profile, MemoryType::Fact] {
            let incoming: Vec<MemoryEntry> = summary
                .written
                .iter()
                .filter(|e| e.mem_type == mem_type)
                .cloned()
                .collect();
            if incoming.is_empty() {
                continue;
            }
            summary.repaired.push(self.repair_with(mem_type, &incoming)?);
        }

        info!(
            written = summary.written.len(),
            proposed = summary.proposed,
            verified = summary.verified,
            deterministic = summary.deterministic,
            forced = ?summary.forced_type,
            "memories extracted"
        );
        Ok(summary)
    }
}
