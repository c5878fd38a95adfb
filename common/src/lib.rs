pub mod error;
pub mod notifier;
pub mod queue;
pub mod storage;
pub mod submission;
pub mod utils;
