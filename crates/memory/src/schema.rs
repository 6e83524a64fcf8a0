use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Canonical on-disk rendering of `updated_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Memory types, each owning its own partition on disk.
///
/// | Type      | Partition                       | Merge policy                          |
/// |-----------|---------------------------------|---------------------------------------|
/// | `Profile` | `profile.md`                    | canonical preference keys, like/dislike exclusive |
/// | `Fact`    | `facts.md`                      | latest `updated_at` per key           |
/// | `Episode` | `episodes/YYYY-MM-DD-episode.md`| none; expires with retention          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Profile,
    Fact,
    Episode,
}

impl MemoryType {
    pub const ALL: [MemoryType; 3] = [Self::Profile, Self::Fact, Self::Episode];

    /// Label written into the `type:` field line and used as a default tag.
    pub fn label(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Fact => "fact",
            Self::Episode => "episode",
        }
    }

    /// Parse a type from its label (case-insensitive).
    ///
    /// Accepts the plural forms and a few synonyms a model tends to produce.
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" | "preference" | "user_profile" | "user-profile" => Some(Self::Profile),
            "fact" | "facts" => Some(Self::Fact),
            "episode" | "episodes" | "episodic" => Some(Self::Episode),
            _ => None,
        }
    }

    /// Parse a session type override.  `"auto"` and empty input mean "no override".
    pub fn parse_override(s: &str) -> Result<Option<Self>, MemoryError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MemoryType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| MemoryError::UnknownMemoryType(s.trim().to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub mem_type: MemoryType,
    /// Ordered, deduplicated classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_at: NaiveDateTime,
    pub content: String,
    /// Partition file the entry was read from.  Derived at read time, never
    /// persisted.
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
}

impl MemoryEntry {
    pub fn new(
        key: impl Into<String>,
        mem_type: MemoryType,
        content: impl Into<String>,
        updated_at: NaiveDateTime,
    ) -> Self {
        Self {
            key: key.into(),
            mem_type,
            tags: Vec::new(),
            updated_at: truncate_to_seconds(updated_at),
            content: content.into(),
            source_file: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    /// Text before the first `:` of the key, used for topic diversity.
    pub fn topic(&self) -> &str {
        self.key.split(':').next().unwrap_or_default()
    }

    /// Trim key and content, normalise tags and drop sub-second precision.
    pub fn normalized(mut self) -> Self {
        self.key = self.key.trim().to_string();
        self.content = self.content.trim().to_string();
        self.tags = normalize_tags(&self.tags);
        self.updated_at = truncate_to_seconds(self.updated_at);
        self
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.key.trim().is_empty() {
            return Err(MemoryError::EmptyKey);
        }
        if self.key.contains(['\n', '\r']) {
            return Err(MemoryError::MultilineKey {
                key: self.key.trim().to_string(),
            });
        }
        if self.content.trim().is_empty() {
            return Err(MemoryError::EmptyContent {
                key: self.key.trim().to_string(),
            });
        }
        Ok(())
    }

    pub fn updated_at_label(&self) -> String {
        format_timestamp(self.updated_at)
    }
}

// ── Timestamps ────────────────────────────────────────────────────────────────

/// `updated_at` assigned to persisted blocks that lack a usable timestamp.
pub fn epoch_sentinel() -> NaiveDateTime {
    // chrono's default NaiveDateTime is 1970-01-01T00:00:00.
    NaiveDateTime::default()
}

/// Current local wall-clock time at second resolution.
pub fn now_local() -> NaiveDateTime {
    truncate_to_seconds(Local::now().naive_local())
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Parse any of the accepted timestamp spellings.
///
/// Date-only values are upgraded to midnight; offsets are converted to local
/// time and dropped.  Returns `None` for empty or unrecognised input.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(day.and_time(NaiveTime::MIN));
    }
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(truncate_to_seconds(
            with_offset.with_timezone(&Local).naive_local(),
        ));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(truncate_to_seconds)
}

/// Normalise a raw `updated_at`; empty or unparsable input becomes `now`.
pub fn normalize_updated_at(raw: &str, now: NaiveDateTime) -> NaiveDateTime {
    parse_timestamp(raw).unwrap_or_else(|| truncate_to_seconds(now))
}

// ── Tags ──────────────────────────────────────────────────────────────────────

/// Trim tags, drop empties and repeats; first occurrence keeps its position.
///
/// Tags are persisted comma-separated, so a tag holding commas is split into
/// its parts here rather than on the next read.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        for part in tag.as_ref().split(',') {
            let part = part.trim();
            if part.is_empty() || out.iter().any(|seen| seen == part) {
                continue;
            }
            out.push(part.to_string());
        }
    }
    out
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// sub-slice.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
