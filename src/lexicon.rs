//! Word lookup behind the match endpoint.
//!
//! The service ships a built-in list of common French words; deployments
//! with a curated vocabulary point `--lexicon-path` at a newline-separated
//! file instead.

use std::collections::HashSet;
use std::path::Path;

use crate::error::TaskError;

/// Cap on matches returned for a single request.
pub const MATCH_LIMIT: usize = 100;

pub trait WordLexicon: Send + Sync {
    fn contains(&self, word: &str) -> bool;
}

/// Splits text into lowercase word tokens. Runs of letters, digits and
/// underscores count as one word; everything else separates.
pub fn extract_words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Returns the distinct lexicon words found in `text`, in order of first
/// appearance, capped at [`MATCH_LIMIT`].
pub fn match_words(lexicon: &dyn WordLexicon, text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut matched = Vec::new();
    for word in extract_words(text) {
        if lexicon.contains(&word) && seen.insert(word.clone()) {
            matched.push(word);
            if matched.len() == MATCH_LIMIT {
                break;
            }
        }
    }
    matched
}

/// Lexicon backed by an in-memory set, loaded once at startup.
#[derive(Debug)]
pub struct StaticLexicon {
    words: HashSet<String>,
}

impl StaticLexicon {
    /// Built-in list of frequent French words.
    pub fn french() -> Self {
        Self::from_words(DEFAULT_FRENCH.iter().copied())
    }

    /// Loads a newline-separated word file. Blank lines and surrounding
    /// whitespace are ignored.
    pub fn from_file(path: &Path) -> Result<Self, TaskError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            TaskError::Dependency(format!("cannot read lexicon {}: {err}", path.display()))
        })?;
        Ok(Self::from_words(
            raw.lines().map(str::trim).filter(|l| !l.is_empty()),
        ))
    }

    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            words: words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl WordLexicon for StaticLexicon {
    fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }
}

const DEFAULT_FRENCH: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "de", "du", "et", "ou", "mais",
    "donc", "or", "ni", "car", "je", "tu", "il", "elle", "on", "nous",
    "vous", "ils", "elles", "me", "te", "se", "moi", "toi", "lui", "leur",
    "mon", "ton", "son", "ma", "ta", "sa", "mes", "tes", "ses", "notre",
    "votre", "ce", "cette", "ces", "qui", "que", "quoi", "dont", "où",
    "ne", "pas", "plus", "jamais", "toujours", "rien", "tout", "tous",
    "toute", "toutes", "être", "avoir", "faire", "dire", "aller", "voir",
    "savoir", "pouvoir", "vouloir", "venir", "devoir", "prendre", "donner",
    "aimer", "parler", "chanter", "vivre", "mourir", "pleurer", "rire",
    "rêver", "amour", "cœur", "âme", "vie", "mort", "nuit", "jour",
    "soleil", "lune", "ciel", "mer", "terre", "monde", "temps", "heure",
    "femme", "homme", "enfant", "ami", "bonjour", "adieu", "oui", "non",
    "bien", "mal", "beau", "belle", "grand", "petit", "dans", "sur",
    "sous", "avec", "sans", "pour", "par", "chez", "entre", "encore",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_lowercases_and_splits_on_punctuation() {
        let words = extract_words("Sous le ciel de Paris, s'envole une chanson!");
        assert_eq!(
            words,
            vec![
                "sous", "le", "ciel", "de", "paris", "s", "envole", "une", "chanson"
            ]
        );
    }

    #[test]
    fn accented_words_survive_extraction() {
        assert_eq!(extract_words("Où est l'été?"), vec!["où", "est", "l", "été"]);
    }

    #[test]
    fn matching_is_distinct_and_ordered_by_first_appearance() {
        let lexicon = StaticLexicon::from_words(["le", "monde", "soleil"]);
        let matched = match_words(&lexicon, "Le monde, le soleil, le monde encore");
        assert_eq!(matched, vec!["le", "monde", "soleil"]);
    }

    #[test]
    fn matching_stops_at_the_limit() {
        let words: Vec<String> = (0..150).map(|i| format!("mot{i}")).collect();
        let lexicon = StaticLexicon::from_words(words.iter().map(String::as_str));
        let text = words.join(" ");
        assert_eq!(match_words(&lexicon, &text).len(), MATCH_LIMIT);
    }

    #[test]
    fn builtin_list_knows_common_words() {
        let lexicon = StaticLexicon::french();
        assert!(lexicon.contains("monde"));
        assert!(lexicon.contains("être"));
        assert!(!lexicon.contains("hello"));
        assert!(lexicon.len() > 50);
    }

    #[test]
    fn missing_file_is_a_dependency_error() {
        let err = StaticLexicon::from_file(Path::new("/nonexistent/words.txt"))
            .expect_err("read should fail");
        assert_eq!(err.error_type(), "dependency");
    }
}
