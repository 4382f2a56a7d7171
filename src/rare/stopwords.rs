//! Stopword sets used to filter rare-word candidates.

use std::collections::HashSet;

use crate::lang::base_code;

const RUSSIAN: &[&str] = &[
    "и", "в", "на", "с", "по", "за", "к", "от", "из", "у", "о", "а", "но", "что",
    "как", "это", "он", "она", "они", "мы", "вы", "я", "ты", "не", "да", "же",
    "бы", "ли", "то", "так", "все", "для", "до", "при", "его", "её", "их", "мой",
    "твой", "наш", "ваш", "свой", "этот", "тот", "такой", "который", "когда",
    "где", "если", "чтобы", "потому", "только", "уже", "ещё", "очень", "можно",
    "нужно", "быть", "есть", "был", "была", "были", "будет",
];

const ENGLISH: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have",
    "has", "had", "do", "does", "did", "will", "would", "could", "should", "may",
    "might", "must", "shall", "can", "to", "of", "in", "for", "on", "with", "at",
    "by", "from", "as", "into", "through", "during", "before", "after", "above",
    "below", "between", "under", "again", "further", "then", "once", "here",
    "there", "when", "where", "why", "how", "all", "each", "few", "more", "most",
    "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so",
    "than", "too", "very", "just", "and", "but", "if", "or", "because", "until",
    "while", "it", "its", "this", "that", "these", "those", "i", "me", "my",
    "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her",
    "hers", "herself", "they", "them", "their", "theirs", "themselves", "what",
    "which", "who", "whom", "am",
];

const SPANISH: &[&str] = &[
    "el", "la", "los", "las", "un", "una", "unos", "unas", "y", "o", "de", "del",
    "en", "con", "por", "para", "a", "al", "que", "es", "son", "está", "están",
    "fue", "fueron", "ser", "estar", "tener", "hacer", "como", "pero", "más",
    "ya", "muy", "también", "solo", "sin", "sobre", "entre", "hasta", "desde",
    "durante", "si", "no", "sí", "yo", "tú", "él", "ella", "nosotros",
    "vosotros", "ellos", "ellas", "mi", "tu", "su", "nuestro", "vuestro",
    "este", "esta", "estos", "estas", "ese", "esa", "esos", "esas", "aquel",
    "aquella", "aquellos", "aquellas", "qué", "quién", "cuál", "cuándo",
    "dónde", "cómo", "cuánto", "hay", "había", "ha", "han", "he", "hemos",
    "me", "te", "se", "le", "les", "lo", "nos", "os",
];

/// Stopword set for a language. Regional variants share the base set
/// (`es-latam` uses the `es` list). Unknown languages get an empty set.
pub fn stopwords(lang: &str) -> HashSet<&'static str> {
    let words: &[&str] = match base_code(lang) {
        "ru" => RUSSIAN,
        "en" => ENGLISH,
        "es" => SPANISH,
        _ => &[],
    };
    words.iter().copied().collect()
}
