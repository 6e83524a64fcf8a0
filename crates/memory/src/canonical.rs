//! Preference canonicalisation and partition merge rules.
//!
//! Preferences live under `pref:{like|dislike}:{token}` keys.  The token is
//! derived from the item alone, so merging groups `like` and `dislike`
//! statements about the same item together and keeps only the most recent
//! one: an item is never both liked and disliked.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::schema::{MemoryEntry, MemoryType, normalize_tags};
use crate::tokenize::{is_cjk, is_word_bounded};

/// Key prefix shared by every canonical preference entry.
pub const PREF_PREFIX: &str = "pref";

/// Items shorter than this (in chars) are discarded.
const MIN_ITEM_CHARS: usize = 1;

const PREF_STOPWORDS: &[&str] = &[
    "什么", "这个", "那个", "东西", "事情", "it", "that", "this", "what", "something", "things",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Like,
    Dislike,
}

impl Polarity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            _ => None,
        }
    }
}

/// Script of the phrase that introduced a preference; decides how the
/// canonical content is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerScript {
    Cjk,
    Latin,
}

impl MarkerScript {
    fn render(self, polarity: Polarity, item: &str) -> String {
        match (self, polarity) {
            (Self::Cjk, Polarity::Like) => format!("喜欢{item}"),
            (Self::Cjk, Polarity::Dislike) => format!("不喜欢{item}"),
            (Self::Latin, Polarity::Like) => format!("I like {item}"),
            (Self::Latin, Polarity::Dislike) => format!("I dislike {item}"),
        }
    }
}

struct PolarityMarker {
    phrase: &'static str,
    polarity: Polarity,
}

const fn marker(phrase: &'static str, polarity: Polarity) -> PolarityMarker {
    PolarityMarker { phrase, polarity }
}

/// Checked in order; the first phrase present in a clause decides its
/// polarity.  Negated and longer phrases come first so `不喜欢` is never read
/// as `喜欢`.
const POLARITY_MARKERS: &[PolarityMarker] = &[
    marker("不再喜欢", Polarity::Dislike),
    marker("不喜欢", Polarity::Dislike),
    marker("讨厌", Polarity::Dislike),
    marker("no longer like", Polarity::Dislike),
    marker("don't like", Polarity::Dislike),
    marker("don\u{2019}t like", Polarity::Dislike),
    marker("do not like", Polarity::Dislike),
    marker("dislike", Polarity::Dislike),
    marker("hate", Polarity::Dislike),
    marker("喜欢", Polarity::Like),
    marker("偏好", Polarity::Like),
    marker("爱好", Polarity::Like),
    marker("like", Polarity::Like),
    marker("love", Polarity::Like),
    marker("prefer", Polarity::Like),
    marker("fond of", Polarity::Like),
];

fn clause_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[，,。；;！!？?\n]+|\.(?:\s+|$)").expect("clause separator regex is valid")
    })
}

fn item_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[、/&]|和|及|与|跟|(?:^|\s)(?:as\s+well\s+as|and|also|or)(?:\s|$)")
            .expect("item separator regex is valid")
    })
}

fn leading_filler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:我|现在|目前|已经|还是|也|还|更|最|都|就|是|的|(?:to|the|a|an|really|also|very|much)\s+)+",
        )
        .expect("leading filler regex is valid")
    })
}

fn trailing_filler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\s+(?:very\s+much|a\s+lot|anymore|too|now))+$")
            .expect("trailing filler regex is valid")
    })
}

const TRAILING_PARTICLES: &[char] = &['了', '吧', '吗', '呀', '啊', '呢', '嘛'];
const EDGE_PUNCTUATION: &[char] = &[
    '：', ':', '，', ',', '。', '.', '；', ';', '！', '!', '？', '?', '"', '\'', '“', '”', ' ',
];

// ── Clause parsing ────────────────────────────────────────────────────────────

/// A clause that states a preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceClause {
    pub polarity: Polarity,
    pub script: MarkerScript,
    pub items: Vec<String>,
}

/// Locate the first marker of the ordered table present in `clause`,
/// returning the marker and the byte offset just past it.
fn find_marker(clause: &str) -> Option<(&'static PolarityMarker, usize)> {
    // ASCII lowering keeps byte offsets valid for the original string.
    let lowered = clause.to_ascii_lowercase();
    POLARITY_MARKERS.iter().find_map(|m| {
        if m.phrase.chars().any(is_cjk) {
            return lowered.find(m.phrase).map(|at| (m, at + m.phrase.len()));
        }
        lowered
            .match_indices(m.phrase)
            .find(|(at, _)| is_word_bounded(&lowered, *at, m.phrase.len()))
            .map(|(at, _)| (m, at + m.phrase.len()))
    })
}

/// Parse one clause into its polarity and the list of items that follow the
/// marker.  Returns `None` when the clause holds no marker or no usable item.
pub fn parse_clause(clause: &str) -> Option<PreferenceClause> {
    let clause = clause.trim();
    if clause.is_empty() {
        return None;
    }
    let (found, tail_start) = find_marker(clause)?;
    let script = if found.phrase.chars().any(is_cjk) {
        MarkerScript::Cjk
    } else {
        MarkerScript::Latin
    };

    let items = item_split_re()
        .split(clause[tail_start..].trim())
        .filter_map(clean_item)
        .collect::<Vec<_>>();
    if items.is_empty() {
        return None;
    }
    Some(PreferenceClause {
        polarity: found.polarity,
        script,
        items,
    })
}

fn clean_item(raw: &str) -> Option<String> {
    let mut item = raw.trim().trim_matches(EDGE_PUNCTUATION).to_string();
    if let Some(stripped) = item.strip_suffix(TRAILING_PARTICLES) {
        item = stripped.to_string();
    }
    let item = trailing_filler_re().replace(&item, "");
    let item = leading_filler_re().replace(&item, "");
    let item = item.trim().trim_matches(EDGE_PUNCTUATION);

    if item.chars().count() < MIN_ITEM_CHARS {
        return None;
    }
    if PREF_STOPWORDS.iter().any(|stop| stop.eq_ignore_ascii_case(item)) {
        return None;
    }
    Some(item.to_string())
}

/// Every `(polarity, item)` stated in `text`, in clause order, each once.
pub fn extract_preferences(text: &str) -> Vec<(Polarity, MarkerScript, String)> {
    let mut out: Vec<(Polarity, MarkerScript, String)> = Vec::new();
    for clause in clause_split_re().split(text) {
        let Some(parsed) = parse_clause(clause) else {
            continue;
        };
        for item in parsed.items {
            if out
                .iter()
                .any(|(p, _, seen)| *p == parsed.polarity && *seen == item)
            {
                continue;
            }
            out.push((parsed.polarity, parsed.script, item));
        }
    }
    out
}

// ── Canonical entries ─────────────────────────────────────────────────────────

/// Stable key token for an item: lowercase, non-word runs become `_`.
/// Items with no word characters fall back to a short content hash.
pub fn pref_token(item: &str) -> String {
    let mut token = String::new();
    let mut pending_sep = false;
    for ch in item.trim().to_lowercase().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_sep && !token.is_empty() {
                token.push('_');
            }
            pending_sep = false;
            token.push(ch);
        } else {
            pending_sep = true;
        }
    }
    let token = token.trim_matches('_').to_string();
    if !token.is_empty() {
        return token;
    }
    let digest = Sha256::digest(item.as_bytes());
    format!("{digest:x}")[..10].to_string()
}

pub fn pref_key(polarity: Polarity, token: &str) -> String {
    format!("{PREF_PREFIX}:{}:{token}", polarity.label())
}

/// Split a canonical preference key into its polarity and item token.
pub fn parse_pref_key(key: &str) -> Option<(Polarity, &str)> {
    let rest = key.strip_prefix(PREF_PREFIX)?.strip_prefix(':')?;
    let (polarity, token) = rest.split_once(':')?;
    let polarity = Polarity::from_label(polarity)?;
    if token.is_empty() {
        return None;
    }
    Some((polarity, token))
}

fn canonical_preference(
    polarity: Polarity,
    script: MarkerScript,
    item: &str,
    updated_at: NaiveDateTime,
    base_tags: &[String],
) -> MemoryEntry {
    let mut tags = base_tags.to_vec();
    tags.push(PREF_PREFIX.to_string());
    tags.push(polarity.label().to_string());
    MemoryEntry::new(
        pref_key(polarity, &pref_token(item)),
        MemoryType::Profile,
        script.render(polarity, item),
        updated_at,
    )
    .with_tags(tags)
}

/// Deterministic preference extraction from a raw user message.
pub fn extract_preference_entries(user_text: &str, updated_at: NaiveDateTime) -> Vec<MemoryEntry> {
    extract_preferences(user_text)
        .into_iter()
        .map(|(polarity, script, item)| {
            let hobby_tag = match script {
                MarkerScript::Cjk => vec!["爱好".to_string()],
                MarkerScript::Latin => Vec::new(),
            };
            let entry = canonical_preference(polarity, script, &item, updated_at, &[]);
            let mut tags = entry.tags.clone();
            tags.extend(hobby_tag);
            entry.with_tags(tags)
        })
        .collect()
}

/// A profile entry rewritten into canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEntry {
    pub entry: MemoryEntry,
    /// Item token when the entry is a preference, independent of polarity.
    pub pref_item: Option<String>,
}

/// Rewrite a profile entry into canonical form.
///
/// * An entry already keyed `pref:{polarity}:{token}` keeps its polarity;
///   the token is re-slugged so `Milk Tea` and `milk_tea` share one group.
/// * Otherwise every preference stated in its content becomes its own
///   canonical entry (one per item).
/// * Anything else keeps its key and gains a `profile` tag when untagged.
pub fn canonicalize_profile_entry(entry: MemoryEntry) -> Vec<CanonicalEntry> {
    let mut normalized = entry.normalized();
    normalized.mem_type = MemoryType::Profile;

    if let Some((polarity, token)) = parse_pref_key(&normalized.key) {
        let token = pref_token(token);
        normalized.key = pref_key(polarity, &token);
        let mut tags = normalized.tags.clone();
        tags.push(PREF_PREFIX.to_string());
        tags.push(polarity.label().to_string());
        normalized.tags = normalize_tags(tags);
        return vec![CanonicalEntry {
            entry: normalized,
            pref_item: Some(token),
        }];
    }

    let prefs = extract_preferences(&normalized.content);
    if prefs.is_empty() {
        if normalized.tags.is_empty() {
            normalized.tags = vec![MemoryType::Profile.label().to_string()];
        }
        return vec![CanonicalEntry {
            entry: normalized,
            pref_item: None,
        }];
    }

    prefs
        .into_iter()
        .map(|(polarity, script, item)| {
            let mut entry = canonical_preference(
                polarity,
                script,
                &item,
                normalized.updated_at,
                &normalized.tags,
            );
            entry.source_file = normalized.source_file.clone();
            CanonicalEntry {
                pref_item: Some(pref_token(&item)),
                entry,
            }
        })
        .collect()
}

// ── Merge ─────────────────────────────────────────────────────────────────────

/// Replace the group holder unless it is strictly newer than `entry`.
/// Later submissions therefore win ties.
fn keep_latest(groups: &mut HashMap<String, MemoryEntry>, group: String, entry: MemoryEntry) {
    match groups.get(&group) {
        Some(current) if current.updated_at > entry.updated_at => {}
        _ => {
            groups.insert(group, entry);
        }
    }
}

fn into_sorted(groups: impl IntoIterator<Item = MemoryEntry>) -> Vec<MemoryEntry> {
    let mut by_key: BTreeMap<String, MemoryEntry> = BTreeMap::new();
    for entry in groups {
        match by_key.get(&entry.key) {
            Some(current) if current.updated_at > entry.updated_at => {}
            _ => {
                by_key.insert(entry.key.clone(), entry);
            }
        }
    }
    by_key.into_values().collect()
}

fn is_mergeable(entry: &MemoryEntry) -> bool {
    match entry.validate() {
        Ok(()) => true,
        Err(err) => {
            debug!(key = %entry.key, error = %err, "dropping invalid entry during merge");
            false
        }
    }
}

/// Final replacement set for the profile partition.
///
/// `existing ++ incoming` is scanned in order; per preference item (or plain
/// key) the entry with the latest `updated_at` survives and ties go to the
/// later one, so freshly submitted statements beat stored ones of the same
/// second.
pub fn merge_profile_entries(existing: &[MemoryEntry], incoming: &[MemoryEntry]) -> Vec<MemoryEntry> {
    let mut pref_by_item: HashMap<String, MemoryEntry> = HashMap::new();
    let mut other_by_key: HashMap<String, MemoryEntry> = HashMap::new();

    for entry in existing.iter().chain(incoming) {
        for canonical in canonicalize_profile_entry(entry.clone()) {
            if !is_mergeable(&canonical.entry) {
                continue;
            }
            match canonical.pref_item {
                Some(item) => keep_latest(&mut pref_by_item, item, canonical.entry),
                None => keep_latest(&mut other_by_key, canonical.entry.key.clone(), canonical.entry),
            }
        }
    }

    into_sorted(other_by_key.into_values().chain(pref_by_item.into_values()))
}

/// Final replacement set for a key-merged partition (facts).
pub fn merge_entries_by_key(
    existing: &[MemoryEntry],
    incoming: &[MemoryEntry],
    mem_type: MemoryType,
) -> Vec<MemoryEntry> {
    let mut latest_by_key: HashMap<String, MemoryEntry> = HashMap::new();
    for entry in existing.iter().chain(incoming) {
        let mut normalized = entry.clone().normalized();
        normalized.mem_type = mem_type;
        if !is_mergeable(&normalized) {
            continue;
        }
        keep_latest(&mut latest_by_key, normalized.key.clone(), normalized);
    }
    into_sorted(latest_by_key.into_values())
}
