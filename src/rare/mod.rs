//! Rare-word extraction and per-sentence distribution.
//!
//! A rare word is one whose lemma scores below the Zipf threshold. Each lemma
//! is assigned to exactly one sentence across the whole project, so a word
//! card is only ever shown (and spoken) the first time the viewer meets it.

pub mod stopwords;
pub mod zipf;

pub use stopwords::stopwords;
pub use zipf::{FrequencyTable, LengthHeuristic, Lemmatizer, LowercaseLemmatizer, ZipfScorer};

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One selected rare word within a sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RareWord {
    pub sentence_idx: usize,
    pub word_position: usize,
    pub surface: String,
    pub lemma: String,
    pub zipf: f64,
    /// Filled by the `rare_words_translate` step.
    pub translation: Option<String>,
}

/// Selection knobs.
#[derive(Debug, Clone)]
pub struct RareWordConfig {
    /// Words with zipf below this are rare.
    pub zipf_threshold: f64,
    /// Floor filtering out unknown/garbage tokens.
    pub min_zipf: f64,
    pub min_per_sentence: usize,
    pub max_per_sentence: usize,
    /// Target average words per sentence, scaled by sentence length.
    pub target_avg: f64,
}

impl Default for RareWordConfig {
    fn default() -> Self {
        Self {
            zipf_threshold: 4.5,
            min_zipf: 0.5,
            min_per_sentence: 0,
            max_per_sentence: 6,
            target_avg: 5.0,
        }
    }
}

struct PoolEntry {
    surface: String,
    zipf: f64,
    count: usize,
    sentences: Vec<usize>,
}

/// Builds the global rare-word pool and distributes it across sentences.
pub struct RareWordIndex<'a> {
    scorer: &'a dyn ZipfScorer,
    lemmatizer: &'a dyn Lemmatizer,
    stopwords: HashSet<&'static str>,
    config: RareWordConfig,
}

fn word_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}_]+").expect("static regex"))
}

impl<'a> RareWordIndex<'a> {
    pub fn new(
        scorer: &'a dyn ZipfScorer,
        lemmatizer: &'a dyn Lemmatizer,
        language: &str,
        config: RareWordConfig,
    ) -> Self {
        Self {
            scorer,
            lemmatizer,
            stopwords: stopwords(language),
            config,
        }
    }

    /// Select rare words for each sentence. Returns one list per input
    /// sentence; a sentence with no qualifying words gets an empty list.
    /// Within each list words are ordered by ascending zipf, and a lemma
    /// never appears in more than one list.
    pub fn select(&self, sentences: &[String]) -> Vec<Vec<RareWord>> {
        if sentences.is_empty() {
            return Vec::new();
        }

        let (pool, sentence_lengths) = self.build_pool(sentences);
        debug!("Rare-word pool: {} lemmas", pool.len());

        let targets = self.per_sentence_targets(&sentence_lengths);

        // Pool sorted rarest-first so the hardest words claim budget first.
        let mut ordered: Vec<(&String, &PoolEntry)> = pool.iter().collect();
        ordered.sort_by(|a, b| {
            a.1.zipf
                .partial_cmp(&b.1.zipf)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let mut result: Vec<Vec<RareWord>> = vec![Vec::new(); sentences.len()];
        let mut used: HashSet<&str> = HashSet::new();

        // First pass: assign each lemma to its first-occurring sentence.
        for (lemma, entry) in &ordered {
            let Some(&first) = entry.sentences.first() else {
                continue;
            };
            if result[first].len() < targets[first] {
                result[first].push(self.make_word(first, lemma.as_str(), entry));
                used.insert(lemma.as_str());
            }
        }

        // Second pass: unplaced lemmas try their later occurrences.
        for (lemma, entry) in &ordered {
            if used.contains(lemma.as_str()) {
                continue;
            }
            for &idx in &entry.sentences {
                if result[idx].len() < targets[idx] {
                    result[idx].push(self.make_word(idx, lemma.as_str(), entry));
                    used.insert(lemma.as_str());
                    break;
                }
            }
        }

        for (idx, words) in result.iter_mut().enumerate() {
            words.sort_by(|a, b| {
                a.zipf
                    .partial_cmp(&b.zipf)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for (pos, word) in words.iter_mut().enumerate() {
                word.sentence_idx = idx;
                word.word_position = pos;
            }
        }

        result
    }

    fn make_word(&self, sentence_idx: usize, lemma: &str, entry: &PoolEntry) -> RareWord {
        RareWord {
            sentence_idx,
            word_position: 0, // fixed up after the per-sentence sort
            surface: entry.surface.clone(),
            lemma: lemma.to_string(),
            zipf: entry.zipf,
            translation: None,
        }
    }

    /// Pool of qualifying lemmas plus per-sentence valid-word counts.
    fn build_pool(&self, sentences: &[String]) -> (HashMap<String, PoolEntry>, Vec<usize>) {
        let mut pool: HashMap<String, PoolEntry> = HashMap::new();
        let mut lengths = Vec::with_capacity(sentences.len());

        for (idx, sentence) in sentences.iter().enumerate() {
            let mut valid_words = 0usize;
            for m in word_re().find_iter(sentence) {
                let surface = m.as_str();
                if surface.chars().count() < 3 {
                    continue;
                }
                let lower = surface.to_lowercase();
                if self.stopwords.contains(lower.as_str()) {
                    continue;
                }
                if surface.chars().all(|c| c.is_ascii_digit()) {
                    continue;
                }
                valid_words += 1;

                let lemma = self.lemmatizer.lemma(surface);
                if self.stopwords.contains(lemma.as_str()) {
                    continue;
                }
                let zipf = self.scorer.zipf(&lemma);
                if zipf < self.config.min_zipf || zipf >= self.config.zipf_threshold {
                    continue;
                }

                let entry = pool.entry(lemma).or_insert_with(|| PoolEntry {
                    surface: surface.to_string(),
                    zipf,
                    count: 0,
                    sentences: Vec::new(),
                });
                entry.count += 1;
                if entry.sentences.last() != Some(&idx) {
                    entry.sentences.push(idx);
                }
            }
            lengths.push(valid_words);
        }

        (pool, lengths)
    }

    /// `round(target_avg * len_i / avg_len)` clamped to the configured range.
    fn per_sentence_targets(&self, lengths: &[usize]) -> Vec<usize> {
        let avg = if lengths.is_empty() {
            1.0
        } else {
            (lengths.iter().sum::<usize>() as f64 / lengths.len() as f64).max(1.0)
        };

        lengths
            .iter()
            .map(|&len| {
                if len == 0 {
                    return 0;
                }
                let target = (self.config.target_avg * len as f64 / avg).round() as usize;
                target.clamp(self.config.min_per_sentence, self.config.max_per_sentence)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scorer with fixed scores for test words; everything else is common.
    struct FixedScorer(HashMap<String, f64>);

    impl FixedScorer {
        fn new(pairs: &[(&str, f64)]) -> Self {
            Self(
                pairs
                    .iter()
                    .map(|(w, z)| (w.to_string(), *z))
                    .collect(),
            )
        }
    }

    impl ZipfScorer for FixedScorer {
        fn zipf(&self, word: &str) -> f64 {
            self.0.get(word).copied().unwrap_or(6.0)
        }
    }

    fn index<'a>(
        scorer: &'a dyn ZipfScorer,
        lemmatizer: &'a dyn Lemmatizer,
        config: RareWordConfig,
    ) -> RareWordIndex<'a> {
        RareWordIndex::new(scorer, lemmatizer, "en", config)
    }

    #[test]
    fn test_empty_input() {
        let scorer = LengthHeuristic;
        let lem = LowercaseLemmatizer;
        let idx = index(&scorer, &lem, RareWordConfig::default());
        assert!(idx.select(&[]).is_empty());
    }

    #[test]
    fn test_no_rare_words_yields_empty_lists() {
        let scorer = FixedScorer::new(&[]);
        let lem = LowercaseLemmatizer;
        let idx = index(&scorer, &lem, RareWordConfig::default());
        let result = idx.select(&["common words everywhere".to_string()]);
        assert_eq!(result.len(), 1);
        assert!(result[0].is_empty());
    }

    #[test]
    fn test_global_uniqueness() {
        let scorer = FixedScorer::new(&[("serendipity", 2.0)]);
        let lem = LowercaseLemmatizer;
        let idx = index(&scorer, &lem, RareWordConfig::default());
        let sentences = vec![
            "pure serendipity happened today".to_string(),
            "serendipity struck once again".to_string(),
        ];
        let result = idx.select(&sentences);
        let total: usize = result.iter().map(|l| l.len()).sum();
        assert_eq!(total, 1);
        assert_eq!(result[0][0].lemma, "serendipity");
        assert!(result[1].is_empty());
    }

    #[test]
    fn test_second_pass_places_overflow() {
        // Three rare words share sentence 0, budget 2; the leftover word
        // also occurs in sentence 1 and lands there.
        let scorer = FixedScorer::new(&[("aardvark", 1.0), ("bezoar", 1.5), ("cormorant", 2.0)]);
        let lem = LowercaseLemmatizer;
        let config = RareWordConfig {
            max_per_sentence: 2,
            target_avg: 2.0,
            ..Default::default()
        };
        let idx = index(&scorer, &lem, config);
        let sentences = vec![
            "the aardvark bezoar cormorant meeting".to_string(),
            "another cormorant flew past silently".to_string(),
        ];
        let result = idx.select(&sentences);
        assert_eq!(result[0].len(), 2);
        assert_eq!(result[1].len(), 1);
        assert_eq!(result[1][0].lemma, "cormorant");
    }

    #[test]
    fn test_ordered_by_ascending_zipf() {
        let scorer = FixedScorer::new(&[("xylophone", 3.0), ("quagmire", 1.0), ("zephyr", 2.0)]);
        let lem = LowercaseLemmatizer;
        let idx = index(&scorer, &lem, RareWordConfig::default());
        let result = idx.select(&["the xylophone quagmire zephyr concert".to_string()]);
        let zipfs: Vec<f64> = result[0].iter().map(|w| w.zipf).collect();
        assert_eq!(zipfs, vec![1.0, 2.0, 3.0]);
        let positions: Vec<usize> = result[0].iter().map(|w| w.word_position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_budget_cap_respected() {
        let words: Vec<String> = (0..20).map(|i| format!("rareword{i:02}")).collect();
        let pairs: Vec<(&str, f64)> = words.iter().map(|w| (w.as_str(), 2.0)).collect();
        let scorer = FixedScorer::new(&pairs);
        let lem = LowercaseLemmatizer;
        let config = RareWordConfig {
            max_per_sentence: 6,
            target_avg: 10.0,
            ..Default::default()
        };
        let idx = index(&scorer, &lem, config);
        let result = idx.select(&[words.join(" ")]);
        assert_eq!(result[0].len(), 6);
    }

    #[test]
    fn test_stopwords_short_words_digits_skipped() {
        let scorer = FixedScorer::new(&[("the", 1.0), ("ab", 1.0), ("12345", 1.0)]);
        let lem = LowercaseLemmatizer;
        let idx = index(&scorer, &lem, RareWordConfig::default());
        let result = idx.select(&["the ab 12345 walked".to_string()]);
        assert!(result[0].is_empty());
    }

    #[test]
    fn test_budget_scales_with_sentence_length() {
        let long_words: Vec<String> = (0..12).map(|i| format!("longword{i:02}")).collect();
        let mut pairs: Vec<(&str, f64)> = long_words.iter().map(|w| (w.as_str(), 2.0)).collect();
        pairs.push(("shorty", 2.0));
        let scorer = FixedScorer::new(&pairs);
        let lem = LowercaseLemmatizer;
        let config = RareWordConfig {
            target_avg: 4.0,
            max_per_sentence: 8,
            ..Default::default()
        };
        let idx = index(&scorer, &lem, config);
        let sentences = vec![long_words.join(" "), "shorty".to_string()];
        let result = idx.select(&sentences);
        // The long sentence gets more budget than the one-word sentence.
        assert!(result[0].len() > result[1].len());
    }

    #[test]
    fn test_lemma_dedup_within_sentence() {
        struct StemLemmatizer;
        impl Lemmatizer for StemLemmatizer {
            fn lemma(&self, surface: &str) -> String {
                surface.to_lowercase().trim_end_matches('s').to_string()
            }
        }
        let scorer = FixedScorer::new(&[("cormorant", 2.0)]);
        let lem = StemLemmatizer;
        let idx = index(&scorer, &lem, RareWordConfig::default());
        let result = idx.select(&["cormorant saw cormorants flying".to_string()]);
        assert_eq!(result[0].len(), 1);
    }
}
