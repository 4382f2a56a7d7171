//! Word-frequency scoring seams.
//!
//! Rarity is expressed on the Zipf scale: base-10 log of occurrences per
//! billion tokens, ~7 for "the", ~1 for very rare words. Scoring is a trait
//! so the index can run against a real frequency table on disk or a cheap
//! heuristic when none is available.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{BilangError, Result};

/// Returns the Zipf frequency score of a word; 0.0 when unknown.
pub trait ZipfScorer: Send + Sync {
    fn zipf(&self, word: &str) -> f64;
}

/// Maps a surface form to its dictionary form. Affects deduplication only,
/// never rarity scores.
pub trait Lemmatizer: Send + Sync {
    fn lemma(&self, surface: &str) -> String;
}

/// Default lemmatizer: lowercases the surface form.
#[derive(Debug, Default)]
pub struct LowercaseLemmatizer;

impl Lemmatizer for LowercaseLemmatizer {
    fn lemma(&self, surface: &str) -> String {
        surface.to_lowercase()
    }
}

/// Frequency table loaded from a `word<TAB>zipf` list on disk.
#[derive(Debug, Default)]
pub struct FrequencyTable {
    scores: HashMap<String, f64>,
}

impl FrequencyTable {
    /// Load a table. Lines are `word<TAB>zipf` (whitespace also accepted);
    /// malformed lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BilangError::Input(format!("Cannot read frequency table {}: {e}", path.display()))
        })?;

        let mut scores = HashMap::new();
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(word), Some(score)) = (parts.next(), parts.next()) else {
                continue;
            };
            if let Ok(zipf) = score.parse::<f64>() {
                scores.insert(word.to_lowercase(), zipf);
            }
        }
        Ok(Self { scores })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl ZipfScorer for FrequencyTable {
    fn zipf(&self, word: &str) -> f64 {
        self.scores.get(&word.to_lowercase()).copied().unwrap_or(0.0)
    }
}

/// Fallback scorer when no frequency table is available: longer words are
/// assumed rarer. Clamped to the valid Zipf range.
#[derive(Debug, Default)]
pub struct LengthHeuristic;

impl ZipfScorer for LengthHeuristic {
    fn zipf(&self, word: &str) -> f64 {
        (7.0 - word.chars().count() as f64 * 0.5).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_length_heuristic() {
        let scorer = LengthHeuristic;
        assert!(scorer.zipf("the") > scorer.zipf("extraordinary"));
        assert!((scorer.zipf("supercalifragilistic") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_table_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "the\t7.1").unwrap();
        writeln!(file, "Serendipity 2.3").unwrap();
        writeln!(file, "garbage-line").unwrap();
        file.flush().unwrap();

        let table = FrequencyTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert!((table.zipf("THE") - 7.1).abs() < 1e-9);
        assert!((table.zipf("serendipity") - 2.3).abs() < 1e-9);
        assert_eq!(table.zipf("unknown"), 0.0);
    }

    #[test]
    fn test_lowercase_lemmatizer() {
        assert_eq!(LowercaseLemmatizer.lemma("Пушкин"), "пушкин");
        assert_eq!(LowercaseLemmatizer.lemma("Running"), "running");
    }
}
