use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use tracing::{debug, info};

use crate::store::{EPISODES_DIR, parse_episode_file_name};

/// Case-insensitive substring match of `text` against `keywords`.
pub fn is_episode_trigger<S: AsRef<str>>(text: &str, keywords: &[S]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|keyword| {
        let keyword = keyword.as_ref().trim().to_lowercase();
        !keyword.is_empty() && lowered.contains(&keyword)
    })
}

/// First date still retained: files dated strictly before it are expired.
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Delete episode files under `root/episodes` dated before
/// `today − retention_days`.  Returns the number of files removed.
///
/// The directory is created when missing.  Names that are not
/// `YYYY-MM-DD-episode.md` (or carry an impossible date) are left alone.
pub fn prune_old_episode_files(root: &Path, retention_days: u32, today: NaiveDate) -> Result<usize> {
    let dir = root.join(EPISODES_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let cutoff = retention_cutoff(today, retention_days);
    let mut removed = 0usize;
    for entry in fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(day) = parse_episode_file_name(&name) else {
            continue;
        };
        if day < cutoff {
            fs::remove_file(entry.path())
                .with_context(|| format!("failed to delete {}", entry.path().display()))?;
            debug!(file = %name, "expired episode file removed");
            removed += 1;
        }
    }

    if removed > 0 {
        info!(removed, %cutoff, "pruned expired episode files");
    }
    Ok(removed)
}
