//! Retention pruning and partition-wide repair for [`MemoryManager`].

use anyhow::Result;
use tracing::{debug, info};

use crate::canonical::{merge_entries_by_key, merge_profile_entries};
use crate::episode::prune_old_episode_files;
use crate::schema::{MemoryEntry, MemoryType, now_local};
use crate::store::Partition;

use super::MemoryManager;

/// Outcome of one repair pass over a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub mem_type: MemoryType,
    pub before: usize,
    pub after: usize,
}

impl RepairReport {
    pub fn removed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

impl MemoryManager {
    /// Delete episode day files past the retention window, then refresh the
    /// key index when anything was removed.
    pub fn prune_episodes(&self) -> Result<usize> {
        let removed = prune_old_episode_files(
            self.store.root(),
            self.config.episode_retention_days,
            now_local().date(),
        )?;
        if removed > 0 {
            self.store.rebuild_index()?;
        }
        Ok(removed)
    }

    /// Re-canonicalise and merge the whole partition of `mem_type`.
    ///
    /// Episodes have no merge policy, so repairing them reports the partition
    /// unchanged.
    pub fn repair(&self, mem_type: MemoryType) -> Result<RepairReport> {
        self.repair_with(mem_type, &[])
    }

    /// Repair with `incoming` treated as the most recent submissions, so they
    /// win timestamp ties against what was already stored.
    pub(crate) fn repair_with(
        &self,
        mem_type: MemoryType,
        incoming: &[MemoryEntry],
    ) -> Result<RepairReport> {
        let partition = match mem_type {
            MemoryType::Profile => Partition::Profile,
            MemoryType::Fact => Partition::Facts,
            MemoryType::Episode => {
                let count = self.store.load_type(MemoryType::Episode)?.len();
                debug!("episode partition has no merge policy; repair skipped");
                return Ok(RepairReport {
                    mem_type,
                    before: count,
                    after: count,
                });
            }
        };

        let existing = self.store.load_partition(partition)?;
        let merged = match mem_type {
            MemoryType::Profile => merge_profile_entries(&existing, incoming),
            _ => merge_entries_by_key(&existing, incoming, mem_type),
        };
        self.store.replace(partition, &merged)?;

        let report = RepairReport {
            mem_type,
            before: existing.len(),
            after: merged.len(),
        };
        info!(
            mem_type = %mem_type,
            before = report.before,
            after = report.after,
            "partition repaired"
        );
        Ok(report)
    }
}
