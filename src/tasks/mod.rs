//! Task handling: what the control plane sends and how it gets executed.

pub mod executor;
pub mod model;

pub use executor::Executor;
pub use model::{AgentMessage, PollResponse, Task, TaskAction, TaskResult, TaskStatus};
