// Duplicate detection: markdown image extraction, text normalisation,
// average-hash fingerprints, and the cached corpus of accepted items.

pub mod corpus;
pub mod detector;
pub mod markdown;
pub mod phash;
pub mod text;

pub use detector::{DuplicateDetector, SimilarItem};
