pub mod artifacts;
pub mod history;
pub mod journal;
pub mod prompts;
pub mod queue;
pub mod slug;
pub mod summary;
