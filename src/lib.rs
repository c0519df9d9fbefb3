//! weft - node-graph workflow engine
//!
//! A workflow is a directed graph of typed nodes joined by connections that
//! leave named output ports. A run starts at the first trigger node and walks
//! the graph one node at a time: each node's parameters are resolved against
//! the run context, the node executes, and its output selects the next node.
//! A node may suspend the run; the run is persisted as `waiting` and resumed
//! later by the wait poller or an event delivery.
//!
//! ## Example
//!
//! ```yaml
//! name: order-check
//! nodes:
//!   - id: start
//!     type: manual_trigger
//!   - id: big-order
//!     type: if
//!     parameters:
//!       conditions:
//!         - value1: "{{ $json.total }}"
//!           operation: greater_than
//!           value2: 100
//!   - id: flag
//!     type: set
//!     parameters:
//!       values:
//!         - name: review
//!           setTo: "required for {{ $json.customer }}"
//! connections:
//!   - source: start
//!     target: big-order
//!   - source: big-order
//!     source_output: "true"
//!     target: flag
//! ```

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod expression;
pub mod metrics;
pub mod nodes;
pub mod shutdown;
pub mod storage;
pub mod telemetry;
pub mod triggers;
pub mod workflow;

pub use error::{Error, Result};
