pub mod issue;
pub mod item;
