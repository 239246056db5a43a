//! Schema-driven dependency inference for stateful API testing.
//!
//! This crate scans the operations of an OpenAPI document, infers which
//! operations produce resources that other operations consume, and turns
//! that knowledge into OpenAPI links that a stateful test driver can follow.
//!
//! The main entry points are [`analyzer::analyze`], which builds a
//! [`graph::DependencyGraph`], and [`links::inject_links`], which writes the
//! inferred links back into the [`schema::ApiSchema`]. [`analysis::SchemaAnalysis`]
//! ties both together and caches the results per schema instance.

pub mod analysis;
pub mod analyzer;
pub mod error;
pub mod graph;
pub mod inputs;
pub mod layers;
pub mod links;
pub mod location;
pub mod naming;
pub mod outputs;
pub mod pointer;
pub mod resource;
pub mod schema;
pub mod unwrap;

// Re-export commonly used types
pub use analysis::{InferenceConfig, SchemaAnalysis};
pub use analyzer::analyze;
pub use error::SchemaError;
pub use graph::DependencyGraph;
pub use links::{inject_links, LinkDefinition, LinkTarget, NormalizedLink};
pub use location::ParameterLocation;
pub use resource::{Cardinality, DefinitionSource, InputSlot, OperationNode, OutputSlot, ResourceDefinition};
pub use schema::{ApiSchema, Operation, OperationKey};
