//! Lexical normalisation shared by retrieval and preference detection.
//!
//! Matching is purely token-based.  Two tricks keep recall reasonable without
//! a segmenter or embeddings:
//!
//! * every contiguous CJK run of two or more characters also contributes its
//!   overlapping bigrams, so `咖啡` matches stored text such as `我喜欢咖啡`;
//! * a few intent markers inject fixed expansion tokens (`不喜欢` also yields
//!   `dislike` and `pref`) so a query phrased one way still hits keys and tags
//!   written another way.

/// `(marker, injected tokens)`.  A marker found in the lowered text injects
/// itself followed by its expansions.  ASCII markers must stand as whole
/// words, so `whatever` does not fire `hate`.
const INTENT_EXPANSIONS: &[(&str, &[&str])] = &[
    ("不喜欢", &["dislike", "pref"]),
    ("讨厌", &["dislike", "pref"]),
    ("dislike", &["pref"]),
    ("don't like", &["dislike", "pref"]),
    ("hate", &["dislike", "pref"]),
    ("喜欢", &["like", "pref"]),
    ("偏好", &["like", "pref"]),
    ("like", &["pref"]),
    ("prefer", &["like", "pref"]),
    ("目标", &["goal"]),
    ("goal", &[]),
    ("正在做", &["project"]),
    ("working on", &["project"]),
];

/// Ideographs from the CJK Unified block and Extension A.
pub fn is_cjk(ch: char) -> bool {
    matches!(ch, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

/// True when `text[start..start + len]` has no ASCII alphanumeric directly
/// before or after it.
pub(crate) fn is_word_bounded(text: &str, start: usize, len: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[start + len..].chars().next();
    !before.is_some_and(|ch| ch.is_ascii_alphanumeric())
        && !after.is_some_and(|ch| ch.is_ascii_alphanumeric())
}

fn contains_marker(text: &str, marker: &str) -> bool {
    if marker.chars().any(is_cjk) {
        return text.contains(marker);
    }
    text.match_indices(marker)
        .any(|(at, _)| is_word_bounded(text, at, marker.len()))
}

fn is_token_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Turn free text into an ordered, duplicate-free token list.
///
/// Order: whitespace/punctuation-split tokens, intent expansions, CJK bigrams.
pub fn normalize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tokens = TokenSet::default();

    for raw in lowered.split(|ch: char| !is_token_char(ch)) {
        tokens.push(raw);
    }

    for (marker, expansions) in INTENT_EXPANSIONS {
        if contains_marker(&lowered, marker) {
            // Multi-word markers are not tokens of their own.
            if marker.chars().all(is_token_char) {
                tokens.push(marker);
            }
            for expansion in *expansions {
                tokens.push(expansion);
            }
        }
    }

    for run in cjk_runs(&lowered) {
        if run.len() < 2 {
            continue;
        }
        for pair in run.windows(2) {
            tokens.push(&pair.iter().collect::<String>());
        }
    }

    tokens.into_vec()
}

/// Maximal runs of consecutive CJK characters.
fn cjk_runs(text: &str) -> Vec<Vec<char>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for ch in text.chars() {
        if is_cjk(ch) {
            current.push(ch);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Insertion-ordered set; token lists are short enough for a linear scan.
#[derive(Default)]
struct TokenSet {
    items: Vec<String>,
}

impl TokenSet {
    fn push(&mut self, token: &str) {
        if token.is_empty() || self.items.iter().any(|t| t == token) {
            return;
        }
        self.items.push(token.to_string());
    }

    fn into_vec(self) -> Vec<String> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::normalize;

    #[test]
    fn lowercases_and_splits_on_punctuation() {
        assert_eq!(normalize("Rust, CLI-tools!"), vec!["rust", "cli", "tools"]);
    }

    #[test]
    fn keeps_underscores_inside_tokens() {
        assert_eq!(normalize("milk_tea"), vec!["milk_tea"]);
    }

    #[test]
    fn cjk_runs_emit_overlapping_bigrams() {
        let tokens = normalize("咖啡因");
        assert_eq!(tokens, vec!["咖啡因", "咖啡", "啡因"]);
    }

    #[test]
    fn two_char_run_is_not_duplicated_by_its_bigram() {
        assert_eq!(normalize("咖啡"), vec!["咖啡"]);
    }

    #[test]
    fn dislike_marker_injects_preference_tokens() {
        let tokens = normalize("我不喜欢什么");
        assert!(tokens.contains(&"不喜欢".to_string()));
        assert!(tokens.contains(&"dislike".to_string()));
        assert!(tokens.contains(&"pref".to_string()));
        // the embedded 喜欢 also fires, widening recall to likes
        assert!(tokens.contains(&"like".to_string()));
    }

    #[test]
    fn goal_and_project_markers_expand() {
        let tokens = normalize("我的目标是什么");
        assert!(tokens.contains(&"goal".to_string()));

        let tokens = normalize("What am I working on?");
        assert!(tokens.contains(&"project".to_string()));
        assert!(!tokens.contains(&"working on".to_string()));
    }

    #[test]
    fn ascii_markers_inside_other_words_do_not_expand() {
        assert_eq!(
            normalize("whatever happened to the parser"),
            vec!["whatever", "happened", "to", "the", "parser"]
        );
        assert_eq!(normalize("likely"), vec!["likely"]);
        assert_eq!(normalize("unlikely goalpost"), vec!["unlikely", "goalpost"]);

        let tokens = normalize("I hate mornings");
        assert!(tokens.contains(&"dislike".to_string()));
        assert!(tokens.contains(&"pref".to_string()));
    }

    #[test]
    fn tokens_are_unique_and_ordered() {
        let tokens = normalize("tea TEA tea coffee");
        assert_eq!(tokens, vec!["tea", "coffee"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(normalize("  ,.!  ").is_empty());
    }
}
