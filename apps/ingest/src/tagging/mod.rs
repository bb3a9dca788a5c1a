pub mod prompts;
pub mod tagger;
pub mod taxonomy;

pub use tagger::ContentTagger;
