//! Node implementations.
//!
//! Nodes are the building blocks of workflows. Each node type receives the
//! payload carried from its predecessor plus its resolved parameters, and
//! returns a payload, a branch on a named port, or a request to suspend.

mod code;
pub mod condition;
mod datetime;
mod email;
mod http;
mod if_node;
mod merge;
mod registry;
mod set;
mod switch;
mod trigger;
mod types;
mod wait;

pub use code::CodeNode;
pub use datetime::DateTimeNode;
pub use email::{ApiMailTransport, EmailNode, MailTransport, OutgoingMail};
pub use http::HttpRequestNode;
pub use if_node::IfNode;
pub use merge::MergeNode;
pub use registry::NodeRegistry;
pub use set::SetNode;
pub use switch::{SwitchNode, DEFAULT_PORT};
pub use trigger::{ManualTriggerNode, ScheduleTriggerNode, WebhookTriggerNode};
pub use types::{
    validate_required, CredentialRequirement, Credentials, Node, NodeDefinition, NodeGroup,
    NodeOutput, PropertyDefinition, PropertyOption, SuspendRequest, TriggerNode,
    TriggerRegistration,
};
pub use wait::WaitNode;
