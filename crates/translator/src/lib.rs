//! Legacy `memory.*` → `emo.*` translation.

pub mod translator;

pub use translator::{MemoryToEmoTranslator, TRANSLATOR_NAME};
