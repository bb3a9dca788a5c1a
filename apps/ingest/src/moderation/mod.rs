pub mod categories;
pub mod classifier;
pub mod handlers;
pub mod messages;
pub mod moderator;
pub mod tracker;

pub use moderator::SafetyModerator;
