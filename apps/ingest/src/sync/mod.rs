pub mod handlers;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod source;
pub mod store;

pub use orchestrator::SyncOrchestrator;
