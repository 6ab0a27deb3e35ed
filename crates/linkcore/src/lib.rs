//! Core abstractions for linkflow
//!
//! This crate provides the data model shared by the runtime, the component
//! catalogue and the binaries: values and port types, flow definitions,
//! the component contract, the error taxonomy and execution events.

mod component;
mod error;
pub mod events;
mod flow;
mod value;

pub use component::{Component, ComponentContext, ComponentOutput, ExecutionMetadata};
pub use error::{FlowError, GraphError, NodeError, NodeFailure, PortDirection, RegistryError};
pub use events::*;
pub use flow::{
    Edge, ErrorHandling, Flow, FlowId, FlowSettings, NodeId, NodeSpec, Position, RetryPolicy,
};
pub use value::{Value, ValueType};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
