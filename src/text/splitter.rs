//! Sentence splitting with abbreviation protection and a length cap.
//!
//! Tokens that contain a period but do not end a sentence (ellipses, file
//! extensions, domains, decimals, numbered-list markers, acronym runs,
//! single-letter initials, known abbreviations) are replaced by placeholders
//! before tokenization and restored afterwards, so `Dr. Watson` or
//! `А. С. Пушкин` never split mid-name.

use regex::Regex;

use crate::error::Result;
use crate::lang::{base_code, require_language};

/// Default max sentence length for bilingual audiobooks; longer sentences
/// are hard to follow with subtitles.
pub const DEFAULT_MAX_SENTENCE_LENGTH: usize = 95;

/// Abbreviations that should not end sentences, per base language code.
fn abbreviations(lang: &str) -> &'static [&'static str] {
    match lang {
        "en" => &[
            "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Jr.", "Sr.", "vs.", "etc.",
            "i.e.", "e.g.", "Inc.", "Ltd.", "Co.", "Corp.", "Ave.", "St.", "Rd.",
            "Mt.", "ft.", "oz.", "lb.", "Jan.", "Feb.", "Mar.", "Apr.", "Jun.",
            "Jul.", "Aug.", "Sep.", "Oct.", "Nov.", "Dec.", "Rev.", "Gen.", "Col.",
            "Lt.", "Sgt.", "Capt.", "Cmdr.", "Adm.", "Ph.D.", "M.D.", "B.A.", "M.A.",
        ],
        "ru" => &[
            "г.", "гг.", "т.д.", "т.п.", "т.е.", "др.", "пр.", "ул.", "д.", "кв.",
            "им.", "проф.", "доц.", "канд.", "акад.", "чл.", "корр.", "ред.", "изд.",
            "см.", "ср.", "напр.", "п.", "пп.", "ч.", "с.", "стр.", "рис.", "табл.",
            "млн.", "млрд.", "тыс.", "руб.", "коп.", "м.", "км.", "кг.", "гр.",
        ],
        "es" => &[
            "Sr.", "Sra.", "Srta.", "Dr.", "Dra.", "Prof.", "Ud.", "Uds.", "etc.",
            "Lic.", "Ing.", "Arq.", "Abog.", "Mtro.", "Mtra.", "Pbro.", "Mons.",
            "Gral.", "Cnel.", "Cap.", "Tte.", "Sgt.", "pág.", "págs.", "vol.",
            "núm.", "tel.", "fax.", "aprox.", "máx.", "mín.", "prom.",
        ],
        _ => &[],
    }
}

/// Comma + conjunction split points, strongest natural breaks after
/// semicolons and em-dashes. Mixed-language list on purpose: a Russian book
/// quoting English dialogue should still split sensibly.
const CONJUNCTIONS: &[&str] = &[
    ", и ", ", а ", ", но ", ", однако ", ", хотя ",
    ", or ", ", and ", ", but ", ", yet ", ", so ",
    ", y ", ", o ", ", pero ", ", aunque ",
];

// The `regex` crate has no look-around; patterns that needed it in the
// protection pass (initials, sentence boundaries) are explicit scans below.
macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex"))
        }
    };
}

static_regex!(ellipsis_re, r"\.{2,}|…");
static_regex!(
    file_ext_re,
    r"(?i)\b(\w+)\.(json|xml|txt|md|py|js|ts|html|css|yml|yaml|csv|pdf|doc|docx|xls|xlsx|mp3|mp4|wav|jpg|png|gif|zip|tar|gz)\b"
);
static_regex!(
    domain_re,
    r"(?i)\b(\w+)\.(com|org|net|ru|io|dev|co|edu|gov|info|me|tv|uk|de|fr|es|it|nl|pl|ua|by|kz)\b"
);
static_regex!(decimal_re, r"(\d+)\.(\d+)");
static_regex!(numbered_re, r"(^|\s)(\d{1,3})\.");
static_regex!(acronym_re, r"\b(?:[A-ZА-ЯЁ]\.){2,}");
static_regex!(dialogue_re, r"\n\s*([—–-] )");
static_regex!(paragraph_re, r"\n\s*\n");
static_regex!(whitespace_re, r"\s+");
static_regex!(boundary_re, r"[.!?]+\s+");

/// Splits text into sentences.
pub struct Splitter {
    max_sentence_length: usize,
    abbr_patterns: Vec<(String, String)>,
}

impl Splitter {
    /// Create a splitter for a language. `max_sentence_length` of 0 disables
    /// the length cap. Unknown languages are rejected.
    pub fn new(language: &str, max_sentence_length: usize) -> Result<Self> {
        let lang = require_language(language)?;
        let abbr_patterns = abbreviations(base_code(lang.code))
            .iter()
            .map(|abbr| {
                let placeholder = format!("_ABBR_{}_", abbr.replace('.', "_DOT_"));
                (abbr.to_string(), placeholder)
            })
            .collect();

        Ok(Self {
            max_sentence_length,
            abbr_patterns,
        })
    }

    /// Split text into sentences. Never fails on malformed text; returns a
    /// best-effort list.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut all = Vec::new();
        for para in self.split_dialogues(text) {
            let para = clean_text(&para);
            if para.is_empty() {
                continue;
            }
            all.extend(self.split_sentences(&para));
        }

        let mut result: Vec<String> = all
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if self.max_sentence_length > 0 {
            result = result
                .into_iter()
                .flat_map(|s| self.split_long_sentence(&s, 0))
                .collect();
        }

        result
    }

    /// Split on dialogue starts (newline + dash) and blank lines.
    fn split_dialogues(&self, text: &str) -> Vec<String> {
        // Promote a dialogue start to a paragraph break, then split on
        // paragraph breaks. Keeps the dash with its speech.
        let promoted = dialogue_re().replace_all(text, "\n\n$1");
        paragraph_re()
            .split(&promoted)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn split_sentences(&self, para: &str) -> Vec<String> {
        let protected = self.protect(para);
        let sentences = tokenize(&protected);
        sentences.iter().map(|s| self.restore(s)).collect()
    }

    fn protect(&self, text: &str) -> String {
        let mut s = ellipsis_re().replace_all(text, "_ELLIPSIS_").into_owned();
        s = file_ext_re().replace_all(&s, "${1}_FEXT_${2}").into_owned();
        s = domain_re().replace_all(&s, "${1}_DOM_${2}").into_owned();
        s = decimal_re().replace_all(&s, "${1}_DECIMAL_${2}").into_owned();
        s = numbered_re().replace_all(&s, "${1}${2}_NUM_").into_owned();
        s = acronym_re()
            .replace_all(&s, |caps: &regex::Captures| caps[0].replace('.', "_ACRO_"))
            .into_owned();
        s = protect_initials(&s);
        for (abbr, placeholder) in &self.abbr_patterns {
            s = s.replace(abbr.as_str(), placeholder);
        }
        s
    }

    fn restore(&self, text: &str) -> String {
        // Reverse order of protection: known abbreviations contain _DOT_ in
        // their placeholder, so they go first.
        let mut s = text.to_string();
        for (abbr, placeholder) in &self.abbr_patterns {
            s = s.replace(placeholder.as_str(), abbr);
        }
        s = s.replace("_INIT_", ".");
        s = s.replace("_ACRO_", ".");
        s = s.replace("_NUM_", ".");
        s = s.replace("_DECIMAL_", ".");
        s = s.replace("_DOM_", ".");
        s = s.replace("_FEXT_", ".");
        s = s.replace("_ELLIPSIS_", "...");
        s
    }

    /// Recursively split a sentence exceeding the cap, preferring
    /// semicolon > spaced em-dash > comma+conjunction > comma near middle.
    fn split_long_sentence(&self, sentence: &str, depth: usize) -> Vec<String> {
        let len = char_len(sentence);
        if len <= self.max_sentence_length || depth > 10 {
            return vec![sentence.to_string()];
        }

        if sentence.contains(';') {
            let raw: Vec<&str> = sentence.split(';').collect();
            if raw.len() > 1 {
                let last = raw.len() - 1;
                let parts: Vec<String> = raw
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        if i < last {
                            format!("{};", p.trim())
                        } else {
                            p.trim().to_string()
                        }
                    })
                    .filter(|p| !p.is_empty() && p != ";")
                    .collect();
                if !parts.is_empty() {
                    return self.recurse(parts, depth);
                }
            }
        }

        if sentence.contains(" — ") {
            let raw: Vec<&str> = sentence.split(" — ").collect();
            if raw.len() > 1 {
                let mut parts = vec![raw[0].trim().to_string()];
                parts.extend(raw[1..].iter().map(|p| format!("— {}", p.trim())));
                let parts: Vec<String> = parts
                    .into_iter()
                    .filter(|p| !p.is_empty() && p != "—")
                    .collect();
                if !parts.is_empty() {
                    return self.recurse(parts, depth);
                }
            }
        }

        for pattern in CONJUNCTIONS {
            if let Some(idx) = sentence.find(pattern) {
                // Split after the comma, before the conjunction.
                let part1 = sentence[..idx + 1].trim().to_string();
                let part2 = sentence[idx + 2..].trim().to_string();
                if !part1.is_empty() && !part2.is_empty() {
                    return self.recurse(vec![part1, part2], depth);
                }
            }
        }

        // Last resort: any comma between 20% and 80% of the length.
        let chars: Vec<(usize, char)> = sentence.char_indices().collect();
        let mid = len / 2;
        let best = chars
            .iter()
            .enumerate()
            .filter(|(_, (_, c))| *c == ',')
            .min_by_key(|(char_pos, _)| char_pos.abs_diff(mid));
        if let Some((char_pos, &(byte_pos, _))) = best {
            let lo = (len as f64 * 0.2) as usize;
            let hi = (len as f64 * 0.8) as usize;
            if char_pos > lo && char_pos < hi {
                let part1 = sentence[..byte_pos + 1].trim().to_string();
                let part2 = sentence[byte_pos + 1..].trim().to_string();
                if !part1.is_empty() && !part2.is_empty() {
                    return self.recurse(vec![part1, part2], depth);
                }
            }
        }

        vec![sentence.to_string()]
    }

    fn recurse(&self, parts: Vec<String>, depth: usize) -> Vec<String> {
        parts
            .iter()
            .flat_map(|p| self.split_long_sentence(p, depth + 1))
            .collect()
    }
}

/// Convenience: split text with the default length cap.
pub fn split_text(text: &str, language: &str) -> Result<Vec<String>> {
    Ok(Splitter::new(language, DEFAULT_MAX_SENTENCE_LENGTH)?.split(text))
}

fn clean_text(text: &str) -> String {
    whitespace_re().replace_all(text, " ").trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn is_caps(c: char) -> bool {
    c.is_ascii_uppercase() || ('А'..='Я').contains(&c) || c == 'Ё'
}

fn is_letter(c: char) -> bool {
    c.is_alphabetic()
}

/// Protect single-letter initials (`А. С. Пушкин`, `J. R. R. Tolkien`).
/// A capital letter with no letter before it, a period after it, and a
/// non-letter (or another initial) following, becomes `X_INIT_`.
fn protect_initials(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if is_caps(c) && chars.get(i + 1) == Some(&'.') {
            let prev_ok = i == 0 || !is_letter(chars[i - 1]);
            let next_ok = match chars.get(i + 2) {
                None => true,
                Some(&n) if n.is_whitespace() || !is_letter(n) => true,
                Some(&n) if is_caps(n) && chars.get(i + 3) == Some(&'.') => true,
                _ => false,
            };
            if prev_ok && next_ok {
                out.push(c);
                out.push_str("_INIT_");
                i += 2;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Split protected text on `[.!?]+` + whitespace + capital letter.
fn tokenize(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in boundary_re().find_iter(text) {
        // Boundary only counts when the next sentence starts with a capital.
        let next = text[m.end()..].chars().next();
        let punct_end = text[m.start()..m.end()]
            .rfind(|c: char| matches!(c, '.' | '!' | '?'))
            .map(|p| m.start() + p + 1)
            .unwrap_or(m.end());
        if matches!(next, Some(c) if is_caps(c)) {
            sentences.push(text[start..punct_end].to_string());
            start = m.end();
        }
    }
    if start < text.len() {
        sentences.push(text[start..].to_string());
    }
    sentences.into_iter().filter(|s| !s.trim().is_empty()).collect()
}
