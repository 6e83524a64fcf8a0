use std::collections::{BTreeSet, HashSet};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::schema::{MemoryEntry, MemoryType, normalize_updated_at, now_local};

// ── Capability traits ─────────────────────────────────────────────────────────

/// One turn of recent conversation handed to the capabilities as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentMessage {
    pub role: String,
    pub content: String,
}

impl RecentMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Proposes candidate entries from a user message.
///
/// Implementations own their failure handling: an unreachable backend or an
/// unparsable reply yields an empty list, never an error.
pub trait Extractor: Send + Sync {
    fn extract(&self, user_text: &str, recent: &[RecentMessage]) -> Vec<MemoryEntry>;
}

/// Filters (and may re-type) proposed entries.  Zero entries in must give
/// zero entries out.
pub trait Verifier: Send + Sync {
    fn verify(
        &self,
        user_text: &str,
        entries: Vec<MemoryEntry>,
        recent: &[RecentMessage],
    ) -> Vec<MemoryEntry>;
}

// ── Deterministic implementations ─────────────────────────────────────────────

/// Never proposes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

impl Extractor for NoopExtractor {
    fn extract(&self, _user_text: &str, _recent: &[RecentMessage]) -> Vec<MemoryEntry> {
        Vec::new()
    }
}

/// Phrase-triggered extractor: a message containing a trigger phrase is
/// stored whole under `{prefix}:{content hash}`.
#[derive(Debug, Clone)]
pub struct RuleExtractor {
    rules: Vec<(String, String)>,
}

impl Default for RuleExtractor {
    fn default() -> Self {
        Self {
            rules: [
                ("我喜欢", "pref"),
                ("我不喜欢", "pref"),
                ("我正在做", "project"),
                ("我的目标是", "goal"),
                ("i'm working on", "project"),
                ("my goal is", "goal"),
            ]
            .into_iter()
            .map(|(phrase, prefix)| (phrase.to_string(), prefix.to_string()))
            .collect(),
        }
    }
}

impl RuleExtractor {
    pub fn with_rule(mut self, phrase: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        self.rules.push((phrase.into(), key_prefix.into()));
        self
    }

    fn propose(&self, user_text: &str, now: NaiveDateTime) -> Option<MemoryEntry> {
        let text = user_text.trim();
        if text.is_empty() {
            return None;
        }
        let lowered = text.to_lowercase();
        let (_, prefix) = self
            .rules
            .iter()
            .find(|(phrase, _)| lowered.contains(&phrase.to_lowercase()))?;

        let digest = format!("{:x}", Sha256::digest(text.as_bytes()));
        let mem_type = if prefix == "pref" {
            MemoryType::Profile
        } else {
            MemoryType::Fact
        };
        Some(
            MemoryEntry::new(format!("{prefix}:{}", &digest[..8]), mem_type, text, now)
                .with_tags([prefix.as_str(), "auto"]),
        )
    }
}

impl Extractor for RuleExtractor {
    fn extract(&self, user_text: &str, _recent: &[RecentMessage]) -> Vec<MemoryEntry> {
        self.propose(user_text, now_local())
            .into_iter()
            .collect()
    }
}

/// Keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughVerifier;

impl Verifier for PassthroughVerifier {
    fn verify(
        &self,
        _user_text: &str,
        entries: Vec<MemoryEntry>,
        _recent: &[RecentMessage],
    ) -> Vec<MemoryEntry> {
        entries
    }
}

/// Offline noise filter: drops content under two characters, content that
/// reads as a question, and repeated keys (first occurrence kept).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicVerifier;

const MIN_CONTENT_CHARS: usize = 2;
const QUESTION_ENDINGS: &[char] = &['?', '？', '吗'];

impl HeuristicVerifier {
    fn is_noise(entry: &MemoryEntry) -> bool {
        let content = entry.content.trim();
        content.chars().count() < MIN_CONTENT_CHARS || content.ends_with(QUESTION_ENDINGS)
    }
}

impl Verifier for HeuristicVerifier {
    fn verify(
        &self,
        _user_text: &str,
        entries: Vec<MemoryEntry>,
        _recent: &[RecentMessage],
    ) -> Vec<MemoryEntry> {
        let mut seen = HashSet::new();
        entries
            .into_iter()
            .filter(|e| !Self::is_noise(e))
            .filter(|e| seen.insert(e.key.trim().to_string()))
            .collect()
    }
}

// ── Model reply decoding ──────────────────────────────────────────────────────

/// One record as proposed by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedRecord {
    pub key: String,
    #[serde(default, alias = "type")]
    pub mem_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ProposedRecord {
    /// Unknown types become facts; a missing timestamp becomes `now`.
    pub fn into_entry(self, now: NaiveDateTime) -> MemoryEntry {
        let mem_type = MemoryType::from_label(&self.mem_type).unwrap_or(MemoryType::Fact);
        let updated_at = normalize_updated_at(self.updated_at.as_deref().unwrap_or_default(), now);
        MemoryEntry::new(self.key, mem_type, self.content, updated_at).with_tags(self.tags)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposedRecords {
    #[serde(default)]
    pub records: Vec<ProposedRecord>,
}

impl ProposedRecords {
    pub fn into_entries(self, now: NaiveDateTime) -> Vec<MemoryEntry> {
        self.records.into_iter().map(|r| r.into_entry(now)).collect()
    }
}

/// Which proposals a verifier model chose to keep, by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDecision {
    #[serde(default)]
    pub keep: Vec<usize>,
}

impl VerifyDecision {
    /// Entries at the kept indices, in their original order.  Out-of-range
    /// and repeated indices are ignored.
    pub fn apply(&self, entries: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
        let keep: BTreeSet<usize> = self.keep.iter().copied().collect();
        entries
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, e)| e)
            .collect()
    }
}

/// Slice out the JSON object in a model reply that may wrap it in prose or a
/// fenced code block.
fn json_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn decode_reply<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    let Some(span) = json_object_span(raw) else {
        bail!("no JSON object found in {what} reply");
    };
    serde_json::from_str(span).with_context(|| format!("failed to decode {what} reply"))
}

/// Decode `{"records":[{key, mem_type, tags, content}]}`.
pub fn parse_proposed_records(raw: &str) -> Result<ProposedRecords> {
    decode_reply(raw, "extractor")
}

/// Decode `{"keep":[indices]}`.
pub fn parse_verify_decision(raw: &str) -> Result<VerifyDecision> {
    decode_reply(raw, "verifier")
}
