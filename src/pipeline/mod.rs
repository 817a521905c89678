pub mod orchestrator;
pub mod retry;

pub use orchestrator::{Orchestrator, RunOptions, RunReport};
pub use retry::RetryPolicy;
