//! Flow execution runtime
//!
//! This crate provides the engine that validates and runs flows: the
//! component registry, the graph builder, the DAG executor with its bounded
//! worker pool, and the result cache shared across runs.

mod cache;
mod executor;
mod graph;
mod registry;
mod runtime;

pub use cache::{CacheConfig, CacheLookup, CacheStats, Fingerprint, ResultCache};
pub use executor::{ExecutionResult, FlowExecutor};
pub use graph::{FlowGraph, GraphBuilder};
pub use registry::{
    ComponentDescriptor, ComponentFactory, ComponentRegistry, FnFactory, PortDefinition,
};
pub use runtime::{FlowRuntime, RuntimeConfig};
