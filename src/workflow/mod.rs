//! Workflow graph definition, parsing, and validation.
//!
//! A workflow is an ordered list of typed nodes plus directed connections
//! between named output and input ports. Graphs are immutable once a run
//! starts; the engine stores a snapshot alongside each run.

mod parser;
mod types;
mod validator;

pub use parser::{parse_workflow, parse_workflow_file};
pub use types::*;
pub use validator::{validate_workflow, validate_workflow_with_registry};
