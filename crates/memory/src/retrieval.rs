//! Lexical retrieval over stored entries.
//!
//! Scoring model:
//! ```text
//! score = 3·key_hit + 2·tag_hit + 1·content_hit
//!       + max(0, 1 − age/recent_days)                                  (recent_days > 0)
//!       + boost·e^(−age/half_life) − penalty·(1 − e^(−age/half_life))  (episodes)
//!       − diversity_penalty                                            (crowded topic)
//! ```
//! Selection is greedy: after each pick, candidates sharing a topic already
//! in the result lose a further `diversity_penalty`.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use lore_config::MemoryConfig;
use tracing::{debug, trace};

use crate::schema::{MemoryEntry, MemoryType, truncate_str};
use crate::tokenize::normalize;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub recent_days: u32,
    pub episode_boost: f64,
    pub episode_penalty: f64,
    pub half_life_days: f64,
    pub diversity_penalty: f64,
    pub snippet_max_chars: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for RetrievalParams {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            top_k: config.inject_top_k,
            recent_days: config.episode_recent_days,
            episode_boost: config.episode_recent_boost,
            episode_penalty: config.episode_stale_penalty,
            half_life_days: config.episode_decay_half_life_days,
            diversity_penalty: config.topic_diversity_penalty,
            snippet_max_chars: config.snippet_max_chars,
        }
    }
}

impl RetrievalParams {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedMemory {
    pub entry: MemoryEntry,
    pub score: f64,
    pub snippet: String,
}

struct Candidate<'a> {
    entry: &'a MemoryEntry,
    score: f64,
}

/// Rank `entries` against `query` as of `now`.
///
/// When the query yields no tokens every entry is a candidate and ranking
/// relies on recency and episode decay alone.
pub fn search(
    entries: &[MemoryEntry],
    query: &str,
    params: &RetrievalParams,
    now: NaiveDateTime,
) -> Vec<RetrievedMemory> {
    if params.top_k == 0 {
        return Vec::new();
    }
    let tokens = normalize(query);

    let mut candidates: Vec<Candidate<'_>> = entries
        .iter()
        .filter_map(|entry| {
            score_entry(entry, &tokens, params, now).map(|score| Candidate { entry, score })
        })
        .collect();

    apply_crowding_penalty(&mut candidates, params.diversity_penalty);
    // Stable sort: equal scores keep load order.
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let picked = select_diverse(candidates, params.top_k, params.diversity_penalty);
    debug!(
        query_tokens = tokens.len(),
        results = picked.len(),
        "memory search complete"
    );

    picked
        .into_iter()
        .map(|(entry, score)| RetrievedMemory {
            snippet: extract_snippet(entry, &tokens, params.snippet_max_chars),
            entry: entry.clone(),
            score,
        })
        .collect()
}

/// Base score of one entry, or `None` when a non-empty query misses it.
pub fn score_entry(
    entry: &MemoryEntry,
    tokens: &[String],
    params: &RetrievalParams,
    now: NaiveDateTime,
) -> Option<f64> {
    let key = entry.key.to_lowercase();
    let content = entry.content.to_lowercase();
    let tags: Vec<String> = entry.tags.iter().map(|t| t.to_lowercase()).collect();

    let key_hit = tokens.iter().any(|t| key.contains(t.as_str()));
    let tag_hit = tokens
        .iter()
        .any(|t| key.contains(t.as_str()) || tags.iter().any(|tag| tag == t));
    let content_hit = tokens.iter().any(|t| content.contains(t.as_str()));

    if !tokens.is_empty() && !(key_hit || tag_hit || content_hit) {
        return None;
    }

    let mut score = 3.0 * f64::from(u8::from(key_hit))
        + 2.0 * f64::from(u8::from(tag_hit))
        + f64::from(u8::from(content_hit));

    let age = age_days(entry.updated_at, now);
    if params.recent_days > 0 {
        score += (1.0 - age / f64::from(params.recent_days)).max(0.0);
    }
    if entry.mem_type == MemoryType::Episode {
        let decay = episode_decay(age, params.half_life_days);
        score += params.episode_boost * decay - params.episode_penalty * (1.0 - decay);
    }

    trace!(
        key = %entry.key,
        key_hit,
        tag_hit,
        content_hit,
        age_days = age,
        score,
        "scored memory entry"
    );
    Some(score)
}

/// Whole days between the two calendar dates, never negative.
pub fn age_days(updated_at: NaiveDateTime, now: NaiveDateTime) -> f64 {
    let days = (now.date() - updated_at.date()).num_days().max(0);
    days as f64
}

/// `e^(−age/half_life)`.  A non-positive half-life means only same-day
/// episodes count as fresh.
pub fn episode_decay(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return if age_days <= 0.0 { 1.0 } else { 0.0 };
    }
    (-age_days / half_life_days).exp()
}

fn apply_crowding_penalty(candidates: &mut [Candidate<'_>], penalty: f64) {
    if penalty == 0.0 {
        return;
    }
    let mut per_topic: HashMap<String, usize> = HashMap::new();
    for c in candidates.iter() {
        *per_topic.entry(c.entry.topic().to_string()).or_default() += 1;
    }
    for c in candidates.iter_mut() {
        if per_topic.get(c.entry.topic()).copied().unwrap_or_default() > 1 {
            c.score -= penalty;
        }
    }
}

/// Greedy pick of `top_k` candidates; each pick demotes the remaining
/// candidates of the same topic by `penalty`.  `candidates` must already be
/// sorted best first so the earliest wins a tie.
fn select_diverse<'a>(
    mut candidates: Vec<Candidate<'a>>,
    top_k: usize,
    penalty: f64,
) -> Vec<(&'a MemoryEntry, f64)> {
    let mut picked = Vec::with_capacity(top_k.min(candidates.len()));
    let mut seen_topics: HashSet<&str> = HashSet::new();

    while picked.len() < top_k && !candidates.is_empty() {
        let effective = |c: &Candidate<'_>| {
            if seen_topics.contains(c.entry.topic()) {
                c.score - penalty
            } else {
                c.score
            }
        };
        let mut best = 0;
        for (i, c) in candidates.iter().enumerate().skip(1) {
            if effective(c) > effective(&candidates[best]) {
                best = i;
            }
        }
        let score = effective(&candidates[best]);
        let chosen: &'a MemoryEntry = candidates.remove(best).entry;
        seen_topics.insert(chosen.topic());
        picked.push((chosen, score));
    }
    picked
}

/// First non-empty line of `content` (then `key`) containing a query token,
/// else the head of the content.  Both are capped at `max_chars`.
pub fn extract_snippet(entry: &MemoryEntry, tokens: &[String], max_chars: usize) -> String {
    let hit = entry
        .content
        .lines()
        .chain(std::iter::once(entry.key.as_str()))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| {
            let lowered = line.to_lowercase();
            tokens.iter().any(|t| lowered.contains(t.as_str()))
        });

    let text = match hit {
        Some(line) => line,
        None if entry.content.trim().is_empty() => entry.key.trim(),
        None => entry.content.trim(),
    };
    truncate_str(text, max_chars).to_string()
}

/// Prompt block listing retrieved memories, `None` when there are none.
pub fn format_memory_block(results: &[RetrievedMemory]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let mut block = String::from("Long-term Memory:");
    for item in results {
        block.push_str("\n- ");
        block.push_str(&item.entry.key);
        block.push_str(": ");
        block.push_str(&item.snippet);
    }
    Some(block)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 11)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn entry(key: &str, mem_type: MemoryType, content: &str, age_days: i64) -> MemoryEntry {
        MemoryEntry::new(key, mem_type, content, now() - Duration::days(age_days))
    }

    fn keys(results: &[RetrievedMemory]) -> Vec<&str> {
        results.iter().map(|r| r.entry.key.as_str()).collect()
    }

    #[test]
    fn relevant_recent_preference_ranks_first() {
        let entries = vec![
            entry("note:misc", MemoryType::Fact, "随便内容", 365).with_tags(["other"]),
            entry("pref:like:咖啡", MemoryType::Profile, "喜欢咖啡", 0).with_tags(["pref"]),
        ];
        let results = search(&entries, "咖啡", &RetrievalParams::default(), now());
        assert_eq!(keys(&results), vec!["pref:like:咖啡"]);
        assert_eq!(results[0].snippet, "喜欢咖啡");
    }

    #[test]
    fn words_containing_markers_do_not_pull_in_preferences() {
        let entries = vec![
            entry("pref:like:咖啡", MemoryType::Profile, "喜欢咖啡", 0).with_tags(["pref", "like"]),
            entry("standup:0211", MemoryType::Fact, "rewrote the parser", 0),
        ];
        let results = search(
            &entries,
            "whatever happened to the parser",
            &RetrievalParams::default(),
            now(),
        );
        assert_eq!(keys(&results), vec!["standup:0211"]);
    }

    #[test]
    fn hit_weights_add_up() {
        let params = RetrievalParams {
            recent_days: 0,
            ..RetrievalParams::default()
        };
        let tokens = normalize("tea");
        let all = entry("tea", MemoryType::Fact, "tea", 0).with_tags(["tea"]);
        let content_only = entry("drink", MemoryType::Fact, "green tea", 0);
        assert_eq!(score_entry(&all, &tokens, &params, now()), Some(6.0));
        assert_eq!(score_entry(&content_only, &tokens, &params, now()), Some(1.0));

        let miss = entry("drink", MemoryType::Fact, "coffee", 0);
        assert_eq!(score_entry(&miss, &tokens, &params, now()), None);
    }

    #[test]
    fn recency_bonus_fades_over_the_window() {
        let params = RetrievalParams::default();
        let tokens = normalize("tea");
        let today = entry("drink", MemoryType::Fact, "tea", 0);
        let older = entry("drink", MemoryType::Fact, "tea", 7);
        assert_eq!(score_entry(&today, &tokens, &params, now()), Some(2.0));
        assert_eq!(score_entry(&older, &tokens, &params, now()), Some(1.0));
    }

    #[test]
    fn fresher_episode_outranks_stale_one() {
        let entries = vec![
            entry("standup:old", MemoryType::Episode, "finished the parser", 30),
            entry("standup:new", MemoryType::Episode, "finished the parser", 1),
        ];
        let params = RetrievalParams {
            top_k: 2,
            diversity_penalty: 0.0,
            ..RetrievalParams::default()
        };
        let results = search(&entries, "parser", &params, now());
        assert_eq!(keys(&results), vec!["standup:new", "standup:old"]);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn decay_with_non_positive_half_life() {
        assert_eq!(episode_decay(0.0, 0.0), 1.0);
        assert_eq!(episode_decay(2.0, -1.0), 0.0);
        assert!((episode_decay(3.0, 3.0) - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn future_timestamps_count_as_today() {
        let later = now() + Duration::days(3);
        assert_eq!(age_days(later, now()), 0.0);
    }

    #[test]
    fn crowded_topic_yields_to_other_topic() {
        let entries = vec![
            entry("pref:like:tea", MemoryType::Profile, "tea tea", 0).with_tags(["tea"]),
            entry("pref:like:green_tea", MemoryType::Profile, "green tea", 0).with_tags(["tea"]),
            entry("drink", MemoryType::Fact, "tea every morning", 0),
        ];
        // Profile hits score 3+2+1+1 = 7, the fact 1+1 = 2.  A penalty above
        // the gap lets the other topic through at top_k = 1.
        let params = RetrievalParams {
            top_k: 1,
            diversity_penalty: 6.0,
            ..RetrievalParams::default()
        };
        let results = search(&entries, "tea", &params, now());
        assert_eq!(keys(&results), vec!["drink"]);

        let params = RetrievalParams {
            diversity_penalty: 1.0,
            ..params
        };
        let results = search(&entries, "tea", &params, now());
        assert_eq!(keys(&results), vec!["pref:like:tea"]);
    }

    #[test]
    fn selection_spreads_topics_and_keeps_load_order_on_ties() {
        let entries = vec![
            entry("a:1", MemoryType::Fact, "x", 0),
            entry("a:2", MemoryType::Fact, "x", 0),
            entry("b:1", MemoryType::Fact, "x", 0),
        ];
        let params = RetrievalParams {
            top_k: 3,
            ..RetrievalParams::default()
        };
        let results = search(&entries, "x", &params, now());
        assert_eq!(keys(&results), vec!["b:1", "a:1", "a:2"]);
        assert_eq!(results[0].score, 2.0);
        assert_eq!(results[1].score, 1.0);
        assert_eq!(results[2].score, 0.0);
    }

    #[test]
    fn empty_query_keeps_every_entry() {
        let entries = vec![
            entry("one", MemoryType::Fact, "alpha", 3),
            entry("two", MemoryType::Fact, "beta", 0),
        ];
        let params = RetrievalParams::default().with_top_k(5);
        let results = search(&entries, "  ?! ", &params, now());
        assert_eq!(keys(&results), vec!["two", "one"]);
    }

    #[test]
    fn zero_top_k_returns_nothing() {
        let entries = vec![entry("one", MemoryType::Fact, "alpha", 0)];
        let params = RetrievalParams::default().with_top_k(0);
        assert!(search(&entries, "alpha", &params, now()).is_empty());
    }

    #[test]
    fn snippet_prefers_matching_line_then_head() {
        let multi = entry("notes", MemoryType::Fact, "intro line\nthe Rust rewrite\n", 0);
        let tokens = normalize("rust");
        assert_eq!(extract_snippet(&multi, &tokens, 240), "the Rust rewrite");

        let key_only = entry("project:rust", MemoryType::Fact, "unrelated", 0);
        assert_eq!(extract_snippet(&key_only, &tokens, 240), "project:rust");

        let long = entry("long", MemoryType::Fact, &"字".repeat(300), 0);
        assert_eq!(extract_snippet(&long, &[], 240).chars().count(), 240);
    }

    #[test]
    fn memory_block_lists_key_and_snippet() {
        assert_eq!(format_memory_block(&[]), None);
        let hit = RetrievedMemory {
            entry: entry("pref:like:奶茶", MemoryType::Profile, "喜欢奶茶", 0),
            score: 6.0,
            snippet: "喜欢奶茶".to_string(),
        };
        assert_eq!(
            format_memory_block(&[hit]).as_deref(),
            Some("Long-term Memory:\n- pref:like:奶茶: 喜欢奶茶")
        );
    }
}
