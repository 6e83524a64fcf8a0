//! Partitioned flat-file store.
//!
//! ```text
//! <root>/
//!   profile.md
//!   facts.md
//!   episodes/YYYY-MM-DD-episode.md
//!   index/memory_keys.tsv
//! ```
//!
//! Every mutation is read-merge-rewrite of one whole partition file followed
//! by an index rebuild; both writes go through [`atomic_write`] so a reader
//! never observes a half-written file.  A single writer process is assumed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::index::KeyIndex;
use crate::schema::{
    MemoryEntry, MemoryType, epoch_sentinel, format_timestamp, normalize_tags, parse_timestamp,
};

pub const PROFILE_FILE: &str = "profile.md";
pub const FACTS_FILE: &str = "facts.md";
pub const EPISODES_DIR: &str = "episodes";
const EPISODE_SUFFIX: &str = "-episode.md";

// ── Partitions ────────────────────────────────────────────────────────────────

/// The file that owns a set of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    Profile,
    Facts,
    Episode(NaiveDate),
}

impl Partition {
    /// Episodes are filed under the date of their own `updated_at`.
    pub fn for_entry(entry: &MemoryEntry) -> Self {
        match entry.mem_type {
            MemoryType::Profile => Self::Profile,
            MemoryType::Fact => Self::Facts,
            MemoryType::Episode => Self::Episode(entry.updated_at.date()),
        }
    }

    pub fn mem_type(self) -> MemoryType {
        match self {
            Self::Profile => MemoryType::Profile,
            Self::Facts => MemoryType::Fact,
            Self::Episode(_) => MemoryType::Episode,
        }
    }

    pub fn file_name(self) -> String {
        match self {
            Self::Profile => PROFILE_FILE.to_string(),
            Self::Facts => FACTS_FILE.to_string(),
            Self::Episode(day) => format!("{}{EPISODE_SUFFIX}", day.format("%Y-%m-%d")),
        }
    }

    /// Path relative to the memory root.
    pub fn relative_path(self) -> PathBuf {
        match self {
            Self::Episode(_) => Path::new(EPISODES_DIR).join(self.file_name()),
            _ => PathBuf::from(self.file_name()),
        }
    }

    /// Inverse of [`Partition::file_name`]; episode names must be exactly
    /// `YYYY-MM-DD-episode.md` with a valid calendar date.
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            PROFILE_FILE => Some(Self::Profile),
            FACTS_FILE => Some(Self::Facts),
            _ => parse_episode_file_name(name).map(Self::Episode),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Date encoded in an episode file name, if the name is well formed.
pub fn parse_episode_file_name(name: &str) -> Option<NaiveDate> {
    let day = name.strip_suffix(EPISODE_SUFFIX)?;
    let shaped = day.len() == 10
        && day.char_indices().all(|(i, ch)| match i {
            4 | 7 => ch == '-',
            _ => ch.is_ascii_digit(),
        });
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Scope accepted by [`MemoryStore::purge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeScope {
    Profile,
    Fact,
    Episode,
    All,
}

impl FromStr for PurgeScope {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" => Ok(Self::Profile),
            "fact" | "facts" => Ok(Self::Fact),
            "episode" | "episodes" => Ok(Self::Episode),
            "all" => Ok(Self::All),
            other => Err(MemoryError::UnknownScope(other.to_string())),
        }
    }
}

impl From<MemoryType> for PurgeScope {
    fn from(mem_type: MemoryType) -> Self {
        match mem_type {
            MemoryType::Profile => Self::Profile,
            MemoryType::Fact => Self::Fact,
            MemoryType::Episode => Self::Episode,
        }
    }
}

// ── Block codec ───────────────────────────────────────────────────────────────

const HEADER_PREFIX: &str = "## ";
const CONTINUATION_INDENT: &str = "  ";

#[derive(Default)]
struct RawBlock {
    key: String,
    mem_type: Option<String>,
    tags: Option<String>,
    updated_at: Option<String>,
    content: Option<String>,
}

impl RawBlock {
    fn into_entry(self, source: Option<&Path>) -> MemoryEntry {
        // Unknown or missing fields fall back to defaults instead of failing.
        let mem_type = self
            .mem_type
            .as_deref()
            .and_then(MemoryType::from_label)
            .unwrap_or(MemoryType::Fact);
        let updated_at = self
            .updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(epoch_sentinel);
        let tags = normalize_tags(self.tags.as_deref().unwrap_or_default().split(','));
        let mut entry = MemoryEntry::new(
            self.key,
            mem_type,
            self.content.unwrap_or_default().trim().to_string(),
            updated_at,
        );
        entry.tags = tags;
        entry.source_file = source.map(Path::to_path_buf);
        entry
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.trim().to_string());
    }
}

/// Parse the block encoding.  Text before the first header and unknown lines
/// are ignored; repeated field lines keep their first value.
pub fn parse_blocks(text: &str, source: Option<&Path>) -> Vec<MemoryEntry> {
    let mut entries = Vec::new();
    let mut current: Option<RawBlock> = None;
    let mut in_content = false;

    for line in text.lines() {
        if let Some(key) = line.strip_prefix(HEADER_PREFIX) {
            if let Some(block) = current.take() {
                entries.push(block.into_entry(source));
            }
            current = Some(RawBlock {
                key: key.trim().to_string(),
                ..RawBlock::default()
            });
            in_content = false;
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };

        if in_content {
            if let Some(rest) = line.strip_prefix(CONTINUATION_INDENT) {
                if let Some(content) = block.content.as_mut() {
                    content.push('\n');
                    content.push_str(rest);
                }
                continue;
            }
            in_content = false;
        }

        let Some(field) = line.strip_prefix("- ") else {
            continue;
        };
        let Some((name, value)) = field.split_once(':') else {
            continue;
        };
        match name.trim() {
            "type" => set_once(&mut block.mem_type, value),
            "tags" => set_once(&mut block.tags, value),
            "updated_at" => set_once(&mut block.updated_at, value),
            "content" => {
                if block.content.is_none() {
                    block.content = Some(value.trim().to_string());
                    in_content = true;
                }
            }
            _ => {}
        }
    }
    if let Some(block) = current.take() {
        entries.push(block.into_entry(source));
    }
    entries
}

fn render_block(entry: &MemoryEntry) -> String {
    let mut lines = entry.content.lines();
    let mut content = lines.next().unwrap_or_default().to_string();
    for line in lines {
        content.push('\n');
        content.push_str(CONTINUATION_INDENT);
        content.push_str(line);
    }
    let tags = entry.tags.join(", ");
    let tags_line = if tags.is_empty() {
        "- tags:".to_string()
    } else {
        format!("- tags: {tags}")
    };
    format!(
        "{HEADER_PREFIX}{}\n- type: {}\n{tags_line}\n- updated_at: {}\n- content: {content}\n",
        entry.key,
        entry.mem_type.label(),
        format_timestamp(entry.updated_at),
    )
}

/// Render entries as blocks sorted by key, separated by blank lines.
pub fn render_blocks(entries: &[MemoryEntry]) -> String {
    let mut sorted: Vec<&MemoryEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));
    sorted
        .into_iter()
        .map(render_block)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Atomic file replacement ───────────────────────────────────────────────────

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a mix.
///
/// The bytes go to a uniquely named hidden sibling which is `fsync`'d and
/// renamed over the destination.  The temp file is removed on every error
/// path.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "partition".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let write_result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.context(format!("failed to write {}", tmp_path.display())));
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

// ── Partition files ───────────────────────────────────────────────────────────

/// Whole-partition read and replace.
pub trait PartitionStore {
    fn load(&self) -> Result<Vec<MemoryEntry>>;
    fn replace(&self, entries: &[MemoryEntry]) -> Result<()>;
}

/// One partition stored as a Markdown block file.
#[derive(Debug, Clone)]
pub struct MarkdownPartition {
    path: PathBuf,
}

impl MarkdownPartition {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartitionStore for MarkdownPartition {
    fn load(&self) -> Result<Vec<MemoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read partition {}", self.path.display()))?;
        Ok(parse_blocks(&raw, Some(&self.path)))
    }

    fn replace(&self, entries: &[MemoryEntry]) -> Result<()> {
        atomic_write(&self.path, render_blocks(entries).as_bytes())
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    /// Open the store at `root`, creating the directory layout and empty
    /// profile/facts files when absent.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        fs::create_dir_all(store.episodes_dir())
            .with_context(|| format!("failed to create {}", store.episodes_dir().display()))?;
        for partition in [Partition::Profile, Partition::Facts] {
            let path = store.partition_path(partition);
            if !path.exists() {
                atomic_write(&path, b"")?;
            }
        }
        if !KeyIndex::path_for(&store.root).exists() {
            store.rebuild_index()?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn episodes_dir(&self) -> PathBuf {
        self.root.join(EPISODES_DIR)
    }

    pub fn partition_path(&self, partition: Partition) -> PathBuf {
        self.root.join(partition.relative_path())
    }

    fn partition_file(&self, partition: Partition) -> MarkdownPartition {
        MarkdownPartition::new(self.partition_path(partition))
    }

    /// Episode files as `(date, path)`, sorted by file name.  Names that do
    /// not follow `YYYY-MM-DD-episode.md` are ignored.
    pub fn episode_files(&self) -> Result<Vec<(NaiveDate, PathBuf)>> {
        let dir = self.episodes_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(day) = parse_episode_file_name(&name) {
                files.push((day, entry.path()));
            }
        }
        files.sort_by(|a, b| a.1.file_name().cmp(&b.1.file_name()));
        Ok(files)
    }

    /// Every partition in load order: profile, facts, episodes by name.
    pub fn partitions(&self) -> Result<Vec<Partition>> {
        let mut partitions = vec![Partition::Profile, Partition::Facts];
        partitions.extend(
            self.episode_files()?
                .into_iter()
                .map(|(day, _)| Partition::Episode(day)),
        );
        Ok(partitions)
    }

    pub fn load_partition(&self, partition: Partition) -> Result<Vec<MemoryEntry>> {
        self.partition_file(partition).load()
    }

    /// Entries of one type; for episodes this spans every day file.
    pub fn load_type(&self, mem_type: MemoryType) -> Result<Vec<MemoryEntry>> {
        let mut entries = Vec::new();
        for partition in self.partitions()? {
            if partition.mem_type() == mem_type {
                entries.extend(self.load_partition(partition)?);
            }
        }
        Ok(entries)
    }

    pub fn load_all(&self) -> Result<Vec<MemoryEntry>> {
        let mut entries = Vec::new();
        for partition in self.partitions()? {
            entries.extend(self.load_partition(partition)?);
        }
        Ok(entries)
    }

    /// Insert or overwrite one entry by key within its partition.
    pub fn upsert(&self, entry: MemoryEntry) -> Result<MemoryEntry> {
        let mut written = self.upsert_all(vec![entry])?;
        Ok(written.remove(0))
    }

    /// Upsert a batch, rewriting each touched partition once and the index
    /// once.  Fails before writing anything if any entry is invalid.
    pub fn upsert_all(&self, entries: Vec<MemoryEntry>) -> Result<Vec<MemoryEntry>> {
        let mut grouped: BTreeMap<Partition, Vec<MemoryEntry>> = BTreeMap::new();
        let mut written = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.normalized();
            entry.validate()?;
            let partition = Partition::for_entry(&entry);
            let mut stored = entry.clone();
            stored.source_file = Some(self.partition_path(partition));
            written.push(stored);
            grouped.entry(partition).or_default().push(entry);
        }

        for (partition, incoming) in grouped {
            let file = self.partition_file(partition);
            let mut by_key: BTreeMap<String, MemoryEntry> = file
                .load()?
                .into_iter()
                .map(|e| (e.key.clone(), e))
                .collect();
            for entry in incoming {
                by_key.insert(entry.key.clone(), entry);
            }
            let merged: Vec<MemoryEntry> = by_key.into_values().collect();
            file.replace(&merged)?;
            debug!(partition = %partition, entries = merged.len(), "partition upserted");
        }

        self.rebuild_index()?;
        Ok(written)
    }

    /// Replace a partition's contents with exactly `entries`.  Entries are
    /// normalised and must be valid; a repeated key keeps its last occurrence.
    pub fn replace(&self, partition: Partition, entries: &[MemoryEntry]) -> Result<()> {
        let mut by_key: BTreeMap<String, MemoryEntry> = BTreeMap::new();
        for entry in entries {
            let entry = entry.clone().normalized();
            entry.validate()?;
            by_key.insert(entry.key.clone(), entry);
        }
        let entries: Vec<MemoryEntry> = by_key.into_values().collect();
        self.partition_file(partition).replace(&entries)?;
        debug!(partition = %partition, entries = entries.len(), "partition replaced");
        self.rebuild_index()?;
        Ok(())
    }

    /// Remove `key` from `partition`.  Returns whether a block was removed.
    pub fn delete(&self, key: &str, partition: Partition) -> Result<bool> {
        let file = self.partition_file(partition);
        let mut entries = file.load()?;
        let before = entries.len();
        entries.retain(|e| e.key != key.trim());
        let removed = entries.len() != before;
        if removed {
            file.replace(&entries)?;
        }
        self.rebuild_index()?;
        Ok(removed)
    }

    pub fn purge(&self, scope: PurgeScope) -> Result<()> {
        if matches!(scope, PurgeScope::Profile | PurgeScope::All) {
            self.partition_file(Partition::Profile).replace(&[])?;
        }
        if matches!(scope, PurgeScope::Fact | PurgeScope::All) {
            self.partition_file(Partition::Facts).replace(&[])?;
        }
        if matches!(scope, PurgeScope::Episode | PurgeScope::All) {
            for (_, path) in self.episode_files()? {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to delete {}", path.display()))?;
            }
        }
        info!(?scope, root = %self.root.display(), "memory purged");
        self.rebuild_index()?;
        Ok(())
    }

    /// Rescan every partition and rewrite the key index.  When a key appears
    /// in more than one file, the later file in load order wins.
    pub fn rebuild_index(&self) -> Result<KeyIndex> {
        let mut index = KeyIndex::default();
        for partition in self.partitions()? {
            let file_name = partition.file_name();
            for entry in self.load_partition(partition)? {
                if entry.key.is_empty() {
                    continue;
                }
                index.insert(entry.key, file_name.clone());
            }
        }
        index.save(&self.root)?;
        Ok(index)
    }

    pub fn index(&self) -> Result<KeyIndex> {
        KeyIndex::load(&self.root)
    }

    /// Partition currently holding `key`, according to the index.
    pub fn locate(&self, key: &str) -> Result<Option<Partition>> {
        Ok(self
            .index()?
            .lookup(key)
            .and_then(Partition::from_file_name))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    fn entry(key: &str, mem_type: MemoryType, content: &str, at: &str) -> MemoryEntry {
        MemoryEntry::new(key, mem_type, content, ts(at))
    }

    fn open() -> (TempDir, MemoryStore) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(dir.path().join("memory")).unwrap();
        (dir, store)
    }

    // ── codec ──────────────────────────────────────────────────────────────

    #[test]
    fn blocks_round_trip() {
        let original = vec![
            entry("pref:like:奶茶", MemoryType::Profile, "喜欢奶茶", "2026-02-11T09:30:00")
                .with_tags(["pref", "like", "爱好"]),
            entry("notes", MemoryType::Fact, "line one\nline two", "2026-02-10T08:00:00"),
        ];
        let text = render_blocks(&original);
        let parsed = parse_blocks(&text, None);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].key, "notes");
        assert_eq!(parsed[0].content, "line one\nline two");
        assert_eq!(parsed[1], original[0]);
    }

    #[test]
    fn rendered_layout_is_stable() {
        let text = render_blocks(&[entry(
            "project:lore",
            MemoryType::Fact,
            "memory subsystem",
            "2026-02-11T09:30:00",
        )
        .with_tags(["project"])]);
        assert_eq!(
            text,
            "## project:lore\n- type: fact\n- tags: project\n- updated_at: 2026-02-11T09:30:00\n- content: memory subsystem\n"
        );
    }

    #[test]
    fn malformed_blocks_fall_back_to_defaults() {
        let text = "stray preamble\n## bare\n- content: only content\n\n## odd\n- type: dream\n- updated_at: yesterday\n- content: x\n- content: ignored\n- colour: blue\n";
        let parsed = parse_blocks(text, None);
        assert_eq!(parsed.len(), 2);

        assert_eq!(parsed[0].key, "bare");
        assert_eq!(parsed[0].mem_type, MemoryType::Fact);
        assert_eq!(parsed[0].updated_at, epoch_sentinel());
        assert!(parsed[0].tags.is_empty());

        assert_eq!(parsed[1].mem_type, MemoryType::Fact);
        assert_eq!(parsed[1].updated_at, epoch_sentinel());
        assert_eq!(parsed[1].content, "x");
    }

    #[test]
    fn empty_text_has_no_blocks() {
        assert!(parse_blocks("", None).is_empty());
        assert!(parse_blocks("just some notes\n", None).is_empty());
    }

    #[test]
    fn episode_file_names_parse_strictly() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 11).unwrap();
        assert_eq!(parse_episode_file_name("2026-02-11-episode.md"), Some(day));
        assert_eq!(parse_episode_file_name("2026-2-11-episode.md"), None);
        assert_eq!(parse_episode_file_name("2026-02-30-episode.md"), None);
        assert_eq!(parse_episode_file_name("notes.md"), None);
        assert_eq!(
            Partition::from_file_name(&Partition::Episode(day).file_name()),
            Some(Partition::Episode(day))
        );
    }

    #[test]
    fn purge_scope_parses() {
        assert_eq!("ALL".parse::<PurgeScope>(), Ok(PurgeScope::All));
        assert_eq!("facts".parse::<PurgeScope>(), Ok(PurgeScope::Fact));
        assert_eq!(
            "yesterday".parse::<PurgeScope>(),
            Err(MemoryError::UnknownScope("yesterday".to_string()))
        );
    }

    // ── store ──────────────────────────────────────────────────────────────

    #[test]
    fn open_creates_layout() -> Result<()> {
        let (_dir, store) = open();
        assert!(store.partition_path(Partition::Profile).exists());
        assert!(store.partition_path(Partition::Facts).exists());
        assert!(store.episodes_dir().is_dir());
        assert!(KeyIndex::path_for(store.root()).exists());
        assert!(store.load_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn upsert_is_idempotent() -> Result<()> {
        let (_dir, store) = open();
        let fact = entry("project:lore", MemoryType::Fact, "memory crate", "2026-02-11T09:00:00");
        store.upsert(fact.clone())?;
        let first = fs::read_to_string(store.partition_path(Partition::Facts))?;
        store.upsert(fact)?;
        let second = fs::read_to_string(store.partition_path(Partition::Facts))?;
        assert_eq!(first, second);
        assert_eq!(store.load_all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn upsert_overwrites_same_key_and_sets_source() -> Result<()> {
        let (_dir, store) = open();
        store.upsert(entry("k", MemoryType::Fact, "old", "2026-02-10T09:00:00"))?;
        let written = store.upsert(entry("k", MemoryType::Fact, "new", "2026-02-11T09:00:00"))?;
        assert_eq!(
            written.source_file.as_deref(),
            Some(store.partition_path(Partition::Facts).as_path())
        );

        let loaded = store.load_partition(Partition::Facts)?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "new");
        assert_eq!(loaded[0].source_file, written.source_file);
        Ok(())
    }

    #[test]
    fn upsert_rejects_invalid_entries() {
        let (_dir, store) = open();
        let err = store
            .upsert(entry("  ", MemoryType::Fact, "x", "2026-02-11T09:00:00"))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<MemoryError>(), Some(&MemoryError::EmptyKey));

        let err = store
            .upsert(entry("a\n## b", MemoryType::Fact, "x", "2026-02-11T09:00:00"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MemoryError>(),
            Some(MemoryError::MultilineKey { .. })
        ));
    }

    #[test]
    fn comma_tags_read_back_as_written() -> Result<()> {
        let (_dir, store) = open();
        let fact = entry("project:lore", MemoryType::Fact, "memory crate", "2026-02-11T09:00:00")
            .with_tags(["rust, storage", "cli"]);
        let written = store.upsert(fact)?;
        assert_eq!(written.tags, vec!["rust", "storage", "cli"]);

        let loaded = store.load_partition(Partition::Facts)?;
        assert_eq!(loaded[0].tags, written.tags);
        Ok(())
    }

    #[test]
    fn episodes_are_filed_by_their_own_date() -> Result<()> {
        let (_dir, store) = open();
        store.upsert(entry("standup", MemoryType::Episode, "shipped", "2026-02-11T18:00:00"))?;
        store.upsert(entry("retro", MemoryType::Episode, "planned", "2026-02-09T10:00:00"))?;

        let days: Vec<String> = store
            .episode_files()?
            .iter()
            .map(|(day, _)| day.to_string())
            .collect();
        assert_eq!(days, vec!["2026-02-09", "2026-02-11"]);

        let all = store.load_all()?;
        assert_eq!(all[0].key, "retro");
        assert_eq!(all[1].key, "standup");
        assert_eq!(
            store.locate("standup")?,
            Some(Partition::Episode(NaiveDate::from_ymd_opt(2026, 2, 11).unwrap()))
        );
        Ok(())
    }

    #[test]
    fn replace_updates_index() -> Result<()> {
        let (_dir, store) = open();
        store.upsert(entry("pref:drink", MemoryType::Profile, "喜欢咖啡", "2026-02-10T09:00:00"))?;
        assert!(store.index()?.contains("pref:drink"));

        store.replace(
            Partition::Profile,
            &[entry("pref:like:咖啡", MemoryType::Profile, "喜欢咖啡", "2026-02-10T09:00:00")],
        )?;
        let index = store.index()?;
        assert!(!index.contains("pref:drink"));
        assert_eq!(index.lookup("pref:like:咖啡"), Some(PROFILE_FILE));
        Ok(())
    }

    #[test]
    fn delete_removes_block_and_index_row() -> Result<()> {
        let (_dir, store) = open();
        store.upsert(entry("a", MemoryType::Fact, "x", "2026-02-11T09:00:00"))?;
        store.upsert(entry("b", MemoryType::Fact, "y", "2026-02-11T09:00:00"))?;

        assert!(store.delete("a", Partition::Facts)?);
        assert!(!store.delete("a", Partition::Facts)?);
        assert_eq!(store.locate("a")?, None);
        assert_eq!(store.locate("b")?, Some(Partition::Facts));
        Ok(())
    }

    #[test]
    fn purge_scopes() -> Result<()> {
        let (_dir, store) = open();
        store.upsert(entry("p", MemoryType::Profile, "x", "2026-02-11T09:00:00"))?;
        store.upsert(entry("f", MemoryType::Fact, "y", "2026-02-11T09:00:00"))?;
        store.upsert(entry("e", MemoryType::Episode, "z", "2026-02-11T09:00:00"))?;

        store.purge(PurgeScope::Episode)?;
        assert!(store.episode_files()?.is_empty());
        assert_eq!(store.load_all()?.len(), 2);
        assert!(!store.index()?.contains("e"));

        store.purge(PurgeScope::All)?;
        assert!(store.load_all()?.is_empty());
        assert!(store.index()?.is_empty());
        assert!(store.partition_path(Partition::Profile).exists());
        Ok(())
    }

    #[test]
    fn index_prefers_later_file_on_collision() -> Result<()> {
        let (_dir, store) = open();
        store.upsert(entry("dup", MemoryType::Fact, "fact", "2026-02-11T09:00:00"))?;
        store.upsert(entry("dup", MemoryType::Episode, "episode", "2026-02-11T09:00:00"))?;
        assert_eq!(
            store.index()?.lookup("dup"),
            Some("2026-02-11-episode.md")
        );
        Ok(())
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("facts.md");
        atomic_write(&path, b"one")?;
        atomic_write(&path, b"two")?;
        assert_eq!(fs::read_to_string(&path)?, "two");
        let leftovers = fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }
}
