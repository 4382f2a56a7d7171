pub mod ass;

pub use ass::{AssConfig, AssGenerator, WordCardEntry};
