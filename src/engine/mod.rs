//! Execution engine: graph walking, node invocation and run lifecycle.

mod context;
mod executor;
mod graph;
mod invoker;
mod monitor;

pub use context::RunContextBuilder;
pub use executor::{merge_resume_data, CancellationRegistry, Executor};
pub use graph::ExecutionGraph;
pub use invoker::NodeInvoker;
pub use monitor::{Monitor, RunEvent};
