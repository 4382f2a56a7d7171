pub mod splitter;

pub use splitter::{split_text, Splitter, DEFAULT_MAX_SENTENCE_LENGTH};
